pub mod error;
pub mod frame;
pub mod planner;
pub mod request;
pub mod session;
pub mod tag;
pub mod transaction;
pub mod transport;
pub mod value;

pub use error::{Error as S7Error, Result as S7Result};
