pub mod connection;
pub mod fanout;

pub use fanout::{Delivery, Fanout, FanoutError, Subscription};
