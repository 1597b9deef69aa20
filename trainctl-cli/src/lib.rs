//! Command-line front end for trainctl: the HTTP control panel a worker
//! launches, and tools for inspecting past runs.

pub mod cli;
