//! EBCOT Tier-2: packet assembly (§4.6). `packet` implements the Annex
//! B.10 packet header codec; `progression` enumerates the five packet
//! orders; `pcrd` implements post-compression rate-distortion truncation.

pub mod packet;
pub mod pcrd;
pub mod progression;
