//! obs-client: remote collaborators of the BCI staging bot
//!
//! This crate wraps everything the bot talks to outside of its own process:
//! the Open Build Service through `osc`, the recipe repository through `git`
//! and the container registry through its HTTP API.
//!
//! ## Key Components
//!
//! - `BuildService`, `RecipeRepository`, `ContainerRegistry`: async traits
//! - `OscClient`, `GitRecipeRepository`, `RegistryClient`: real backends
//! - `fakes`: in-memory backends for tests
//! - `RetryPolicy`: bounded exponential backoff for flaky remote calls

pub mod command;
mod error;
pub mod fakes;
pub mod git;
pub mod osc;
pub mod recipes;
pub mod registry;
pub mod retry;
pub mod traits;

pub use command::{CommandOutput, CommandRunner, Invocation};
pub use error::ObsError;
pub use git::GitRecipeRepository;
pub use osc::{OscClient, OscCredentials, OBS_API_URL};
pub use recipes::{is_generated_file, is_package_dir, RecipeSet};
pub use registry::{RegistryClient, OPENSUSE_REGISTRY};
pub use retry::RetryPolicy;
pub use traits::{BuildService, ContainerRegistry, FileChange, RecipeRepository, Removal};

/// Result type for obs-client operations
pub type Result<T> = std::result::Result<T, ObsError>;
