pub mod cli;
mod qr;
mod response;
