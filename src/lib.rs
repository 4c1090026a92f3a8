//! The kernel core and entrypoint
//!
//! Three tightly coupled subsystems built on top of a raw sector device,
//! each implemented as a submodule:
//!
//! - [`fs`]: multi-level indexed on-disk file system with hierarchical
//!   directories and in-place file growth
//! - [`mm`]: demand-paged virtual memory with a frame table, swap
//!   partition and clock eviction
//! - [`syscall`]: the numbered system-call surface that validates user
//!   pointers and mediates access to the other two
//!
//! Hardware-facing collaborators (block driver, trap stubs, program
//! loader, console) enter through the traits in [`block`] and [`task`],
//! so the same code runs under an emulated machine or under host tests.
//! All kernel-wide state hangs off a [`kernel::Kernel`] context rather
//! than ambient statics.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate log;

#[macro_use]
extern crate bitflags;

pub mod block;
pub mod config;
pub mod fs;
pub mod kernel;
pub mod kerror;
pub mod logging;
pub mod mm;
pub mod syscall;
pub mod task;
