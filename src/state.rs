mod session;

pub use session::{SessionSnapshot, SessionStore};
