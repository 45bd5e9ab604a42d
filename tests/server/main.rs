mod common;

mod breakpoints;
mod handshake;
