/*
    session - Client identity registration on every channel (re)open
*/

pub mod registrar;

pub use registrar::SessionRegistrar;
