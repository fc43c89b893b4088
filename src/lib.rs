pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod state;
pub mod stream;
pub mod tags;
pub mod transport;
pub mod turn;

mod util;
