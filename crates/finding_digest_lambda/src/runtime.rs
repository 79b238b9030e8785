pub use finding_digest_core::{contract, settings, templates};
