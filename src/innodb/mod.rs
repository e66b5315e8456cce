//! InnoDB binary format decoding.
//!
//! The modules follow the on-disk structure from the outside in: the page
//! store ([`tablespace`], [`cache`]), FIL headers and checksums ([`page`],
//! [`checksum`]), page classification ([`page_types`], [`dispatch`]), INDEX
//! page internals ([`index`], [`directory`], [`record`], [`layout`],
//! [`field_decode`]), off-page columns ([`lob`]) and finally the B+tree
//! walker ([`btree`]) and row decoder ([`rows`]).
//!
//! Start with [`tablespace::Tablespace`] to open a `.ibd` file, then use
//! [`btree::TreeWalker`] to read an index in key order.

pub mod btree;
pub mod builder;
pub mod cache;
pub mod checksum;
pub mod constants;
pub mod directory;
pub mod dispatch;
pub mod field_decode;
pub mod index;
pub mod layout;
pub mod lob;
pub mod page;
pub mod page_types;
pub mod record;
pub mod rows;
pub mod schema;
pub mod sdi;
pub mod tablespace;
