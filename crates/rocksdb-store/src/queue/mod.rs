pub mod schemas;
pub(crate) mod txn;
