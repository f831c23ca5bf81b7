//! Shared types for the YARN kernel provider and its installer.

/// Connection details reported by kernel launchers
pub mod connection_info;

/// Jupyter data directories and the kernel search path
pub mod jupyter_paths;

/// Kernelspec descriptor types
pub mod kernel_spec;

/// `{name}` placeholder substitution
pub mod placeholders;

/// Port ranges for launcher response sockets
pub mod port_range;
