//! # SortOfRemote NG – FTP sync transport
//!
//! Transport adapter that lets the sync engine move files over FTP/FTPS:
//!   • Connection establishment with trust-on-first-use certificates
//!   • One-shot reconnect once a first-seen certificate was captured
//!   • Throttled, chunked uploads & downloads with progress events
//!   • Listing path normalisation into canonical absolute paths
//!   • Keep-alive NOOPs that never interleave with a running transfer
//!   • Blocking and suspending call conventions over one copy routine

pub mod ftp;
