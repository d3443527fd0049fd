pub mod color;
pub mod connctx;
pub mod cursor;
pub mod dispatcher;
pub mod edit_sync;
pub mod handler;
pub mod presence;
pub mod registry;
