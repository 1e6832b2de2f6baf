mod common;
mod memory;
