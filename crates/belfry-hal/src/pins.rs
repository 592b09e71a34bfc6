//! Pin assignments for the L298N wiring on the Orange Pi 5 header.
//!
//! Numbers use the wiringOP numbering scheme; run `gpio readall` on the
//! target board to verify the mapping before changing them.

use serde::{Deserialize, Serialize};

/// Full pin map for the motor driver and the STOP button.
///
/// Motor A (clock 1): ENA + IN1/IN2. Motor B (clock 2): ENB + IN3/IN4.
/// The IN pairs fix each motor's direction; they are written once at init
/// and never change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinMap {
    pub ena: u8,
    pub in1: u8,
    pub in2: u8,
    pub enb: u8,
    pub in3: u8,
    pub in4: u8,
    pub stop_button: u8,
    /// (IN1, IN2) levels selecting motor A's rotation direction.
    pub motor_a_direction: (u8, u8),
    /// (IN3, IN4) levels selecting motor B's rotation direction.
    pub motor_b_direction: (u8, u8),
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            ena: 2,          // physical pin 7 (PWM15)
            in1: 5,          // physical pin 11
            in2: 7,          // physical pin 13
            enb: 16,         // physical pin 26 (PWM1)
            in3: 8,          // physical pin 15
            in4: 13,         // physical pin 22
            stop_button: 6,  // physical pin 12
            motor_a_direction: (1, 0),
            motor_b_direction: (1, 0),
        }
    }
}
