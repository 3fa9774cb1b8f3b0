pub mod action;
pub mod canon;
pub mod db;
mod densemap;
pub mod env;
pub mod error;
pub mod fs;
pub mod graph;
pub mod hash;
pub mod make;
pub mod node;
pub mod order;
pub mod process;
#[cfg(unix)]
mod process_posix;
pub mod progress;
pub mod run;
pub mod runner;
pub mod scan;
pub mod scanner;
pub mod task;
pub mod work;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
