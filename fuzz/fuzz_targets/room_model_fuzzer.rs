//! Fuzz target comparing the room session with its reference model
//!
//! # Strategy
//!
//! - Arbitrary [`Operation`] sequences: local commands, server frames and
//!   channel drops, interleaved freely
//!
//! # Invariants
//!
//! - Local commands are accepted or rejected exactly as the model says
//! - Membership, roster, code buffer and transcript match the model after
//!   every operation
//! - NEVER panic on any sequence

#![no_main]

use collab_harness::{ModelRoom, Operation, RealRoom};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|ops: Vec<Operation>| {
    let mut model = ModelRoom::new();
    let Ok(mut real) = RealRoom::new() else {
        return;
    };

    for op in &ops {
        let expected = model.apply(op);
        assert_eq!(real.apply(op), Ok(expected), "result divergence at {op:?}");
        assert_eq!(model.observable(), real.observable(), "state divergence at {op:?}");
    }
});
