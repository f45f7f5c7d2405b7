//! Data loading and shaping
//!
//! Table readers, row deduplication, feature/target splits, the trip-record
//! reader and the dictionary vectorizer used by the regression flows.

pub(crate) mod dataset;
mod dedup;
mod loader;
mod sparse;
mod split;
mod trips;
mod vectorizer;

pub use dataset::{Dataset, DATASET_FILES};
pub use dedup::drop_duplicates;
pub use loader::DataLoader;
pub use sparse::CsrMatrix;
pub use split::{column_to_f64, split_x_y, train_test_split, TrainTestSplit};
pub use trips::{prepare_trip_datasets, read_trip_data, trip_durations, trip_features, TRIP_CATEGORICAL, TRIP_TARGET};
pub use vectorizer::{DictVectorizer, FeatureRecord, FeatureValue};
