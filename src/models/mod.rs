//! Model registry, loading, caching and scoring

pub mod cache;
pub mod classifier;
pub mod inference;
pub mod loader;
pub mod onnx;
pub mod registry;
pub mod scaler;

pub use cache::{ModelCache, ModelRefresher, ModelSnapshot};
pub use classifier::{Classifier, LinearClassifier, Prediction};
pub use inference::Scorer;
pub use loader::{ArtifactLoader, FileArtifactLoader};
pub use registry::{DirectoryRegistry, ModelRegistry, ModelVersion, StagingArea};
pub use scaler::{ScalerBundle, StandardScaler};
