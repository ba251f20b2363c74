//! EBCOT Tier-1: per-code-block bit-plane entropy coding (§4.5). `contexts`
//! implements the Annex D context assignment rules; `coder` drives the MQ
//! coder through the three coding passes per bit-plane.

pub mod contexts;
pub mod coder;
