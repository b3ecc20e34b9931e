pub use crate::{
    buf::{Buf20, Buf32},
    exec::{ExecHeader, RawLog},
    payload::{Deposit, Redirect, Withdrawal},
};
