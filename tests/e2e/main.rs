//! End-to-end scenarios driving the vex core through full command
//! sequences, including crash/restart simulation.

mod harness;
mod scenarios;
