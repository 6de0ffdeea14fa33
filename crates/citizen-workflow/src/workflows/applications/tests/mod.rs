mod common;
mod resubmit;
