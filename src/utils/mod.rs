//! Common utilities shared by the library and the command-line binaries.
//!
//! - **`data_loader`**: Reads and writes the line-oriented `.kfa` assembly artifact
//!   (stiffness, mass and damping entries, the reference load and the numbering
//!   tables) and turns it into an [`crate::assembly::AssembledSystem`].
//!

pub mod data_loader;
