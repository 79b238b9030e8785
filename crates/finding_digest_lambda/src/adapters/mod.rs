pub mod model;
pub mod notify;
