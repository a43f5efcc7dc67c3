//! Output widgets for the bioview toolkit.
//!
//! State-only implementations of the consumer contract: the data grid,
//! the card gallery, the map view and the download control. Rendering
//! is the embedding application's concern; these types hold everything
//! a renderer needs and feed widget state back into query compilation.

pub mod cards;
pub mod download;
pub mod grid;
pub mod map;
pub mod pager;
pub mod rows;

// Re-export commonly used types
pub use cards::{Card, CardGallery};
pub use download::DownloadControl;
pub use grid::{DataGrid, GridRow};
pub use map::{MapFeature, MapLayer, MapView};
pub use pager::PagerState;
pub use rows::{source_data_list, DataRow, FIELDLIST_DOC_PATH};
