//! ipphttp - HTTP/1.1 transport engine for IPP
//!
//! This crate provides the connection object that IPP clients and servers
//! use to exchange HTTP/1.1 messages over a single socket: buffered I/O,
//! chunked framing, gzip/deflate content coding, in-band TLS upgrade and
//! authorization header bookkeeping.

pub mod http;
pub mod net;
