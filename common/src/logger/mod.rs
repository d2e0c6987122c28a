mod init;
mod spans;

pub use init::init_logger;
pub use spans::{child_span, root_span};
