pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod load;
pub mod notify;
pub mod pipeline;
pub mod records;
pub mod transform;
pub mod utils;
pub mod validate;

#[cfg(test)]
mod test_utils;
