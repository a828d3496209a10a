pub mod gate_signals;
pub mod presence_gate;
