//! Concrete geocoding providers for unigeo
//!
//! - [`here::HereProvider`]: forward/reverse search plus the job-poll batch
//!   service
//! - [`tomtom::TomTomProvider`]: forward/reverse search plus the
//!   redirect-chase batch service
//! - [`arcgis::ArcGisProvider`]: forward/reverse search with optional
//!   client-credentials tokens; batches use the concurrent fallback
//!
//! All three embed an [`AddressSearch`] for the shared request plumbing.

pub mod address_search;
pub mod arcgis;
pub mod here;
pub mod tomtom;

pub use address_search::AddressSearch;
pub use arcgis::{ArcGisEndpoints, ArcGisProvider};
pub use here::{HereEndpoints, HereProvider};
pub use tomtom::{TomTomCodec, TomTomEndpoints, TomTomProvider};
