//! EPG episode-number resolution engine
//!
//! Scans MediaPortal's EPG table for series recordings that are missing
//! season/episode numbers and fills them in, either by parsing the EPG
//! description text or by looking the episode up on TheTVDB. Remote
//! responses are persisted in a local file cache with incremental-update
//! awareness so repeated runs stay cheap.

pub mod config;
pub mod db;
pub mod services;
