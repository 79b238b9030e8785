use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use finding_digest_core::contract::{decode_envelope, ModelRequest};
use finding_digest_core::settings::ModelSettings;
use finding_digest_core::templates::{build_email_body, build_email_subject, build_prompt};
use zip::result::ZipResult;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const LAMBDA_PACKAGE: &str = "finding_digest_lambda";
const LAMBDA_BIN: &str = "finding_digest";
const DIST_DIR: &str = "infra/dist";
const SAMPLE_FINDING: &str = "infra/samples/guardduty_finding.json";
/// Entry name the `provided.al2023` runtime executes.
const BOOTSTRAP_ENTRY: &str = "bootstrap";

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the finding digest workspace",
    long_about = "A unified CLI for CI checks, Lambda packaging, and rendering\n\
                  finding digests locally without calling AWS."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build and zip the Lambda binary as `bootstrap` for the CloudFormation template
    Package {
        /// Function architecture; must match `Architectures` in infra/template.yaml
        #[arg(value_enum, long, default_value_t = LambdaArch::X86_64)]
        arch: LambdaArch,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Print the model request, subject and email body for a finding file
    RenderSample {
        /// Path to a GuardDuty finding event (EventBridge envelope)
        #[arg(long, default_value = SAMPLE_FINDING)]
        finding: String,
        /// Text substituted for the model summary
        #[arg(long, default_value = "<model summary>")]
        summary: String,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting and clippy
    Lint,
    /// Workspace tests
    Test,
    /// Lint + test
    Check,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LambdaArch {
    #[value(name = "x86_64")]
    X86_64,
    Arm64,
}

impl LambdaArch {
    fn target_triple(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64-unknown-linux-gnu",
            Self::Arm64 => "aarch64-unknown-linux-gnu",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_lambda(arch: LambdaArch, profile: BuildProfile) {
    let target = arch.target_triple();
    if !target_installed(target) {
        eprintln!("rust target `{target}` is missing; run `rustup target add {target}`");
        exit(1);
    }

    step("Build finding digest lambda binary");
    let mut cargo_args = vec!["build", "-p", LAMBDA_PACKAGE, "--bin", LAMBDA_BIN, "--target", target];
    cargo_args.extend(profile.as_cargo_flag());
    run_cargo(&cargo_args);

    step("Zip bootstrap");
    let binary_path: PathBuf = ["target", target, profile.dir_name(), LAMBDA_BIN].iter().collect();
    let binary = fs::read(&binary_path)
        .unwrap_or_else(|error| panic!("cannot read '{}': {error}", binary_path.display()));

    fs::create_dir_all(DIST_DIR).expect("failed to create infra/dist");
    let zip_path = Path::new(DIST_DIR).join(format!("{LAMBDA_BIN}.zip"));
    let file = fs::File::create(&zip_path).expect("failed to create lambda zip");
    write_bootstrap_zip(&binary, file).expect("failed to write lambda zip");

    eprintln!("\nPackaged {} ({} bytes of {arch:?} binary)", zip_path.display(), binary.len());
}

/// Checks `rustup` for the target; without rustup the build itself reports it.
fn target_installed(target: &str) -> bool {
    match Command::new("rustup").args(["target", "list", "--installed"]).output() {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|line| line.trim() == target),
        _ => true,
    }
}

fn write_bootstrap_zip<W: Write + Seek>(binary: &[u8], writer: W) -> ZipResult<W> {
    let mut zip = ZipWriter::new(writer);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file(BOOTSTRAP_ENTRY, options)?;
    zip.write_all(binary)?;
    zip.finish()
}

fn render_sample(finding_path: &str, summary: &str) {
    let raw = fs::read_to_string(finding_path)
        .unwrap_or_else(|error| panic!("failed to read '{finding_path}': {error}"));
    let envelope = decode_envelope(&raw)
        .unwrap_or_else(|error| panic!("'{finding_path}' is not a finding envelope: {error}"));
    let fields = envelope.summary_fields();

    let request = ModelRequest::for_prompt(build_prompt(&raw), &ModelSettings::default());
    let request_json =
        serde_json::to_string_pretty(&request).expect("model request should serialize");

    step("Model request");
    println!("{request_json}");

    step("Subject");
    println!("{}", build_email_subject(&fields));

    step("Email body");
    println!(
        "{}",
        build_email_body(&fields, summary, "1970-01-01T00:00:00+00:00")
    );
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_lint() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);
}

fn ci_test() {
    step("Test finding_digest_core");
    run_cargo(&["test", "-p", "finding_digest_core"]);

    step("Test finding_digest_lambda");
    run_cargo(&["test", "-p", LAMBDA_PACKAGE]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { job } => {
            match job {
                CiJob::Lint => ci_lint(),
                CiJob::Test => ci_test(),
                CiJob::Check => {
                    ci_lint();
                    ci_test();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::Package { arch, profile } => {
            package_lambda(arch, profile);
        }
        Commands::RenderSample { finding, summary } => {
            render_sample(&finding, &summary);
        }
    }
}
