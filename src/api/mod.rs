pub mod auth;
pub mod client;
pub mod models;

mod albums;
mod artists;
mod mixes;
mod playlists;
pub mod search;
mod tracks;
mod user;

pub use tracks::TrackManifestData;
