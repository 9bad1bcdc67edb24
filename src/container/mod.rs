//! Container image builds and launch specifications
//!
//! Every sub-server runs in its own image, tagged by its id. [`ImageBuilder`]
//! produces that image; [`translate`] turns a configuration into the exact
//! `run` invocation the proxy client spawns.

mod builder;
mod launch;

pub use builder::{ImageBuilder, build_and_record, dockerfile_for, image_tag_for};
pub use launch::{LaunchSpec, remove_container, translate};
