#![no_std]

// Pulse-generation core for the stimulator.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Hardware collaborators (pulse output, ADC trigger,
// clock, diagnostics link) are reached through traits so the same state machine
// runs on the STM32 target and inside the emulator.

pub mod capture;
pub mod engine;
pub mod output;
pub mod settings;
pub mod telemetry;
pub mod terminal;
pub mod timebase;
