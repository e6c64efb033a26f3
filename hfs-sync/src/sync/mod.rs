pub mod conflict;
pub mod engine;
pub mod ensure;
pub mod error;
pub mod oracle;
pub mod paths;
pub mod transfer;
pub mod walk;

#[cfg(test)]
mod test_support;
