mod open;
mod models;
mod append;

pub use open::SummaryWriter;
pub use models::*;
pub use append::append_summary;
