//! Session state shared by the synchronous API and the runtime.

pub mod session;
