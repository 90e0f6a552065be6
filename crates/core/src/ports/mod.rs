mod chain_client;
mod deriver;
mod notifier;
mod repository;

pub use chain_client::*;
pub use deriver::*;
pub use notifier::*;
pub use repository::*;
