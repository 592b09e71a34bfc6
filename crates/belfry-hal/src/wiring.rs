//! wiringOP CLI backend for the Orange Pi 5 deployment.
//!
//! Drives the L298N through the `gpio` binary (`gpio mode`, `gpio write`,
//! `gpio read`) rather than a kernel GPIO character device, matching how
//! the board is provisioned. Each write shells out once; the calls are
//! fast enough to stay inside the Safety Gate's lock.

use std::process::Command;

use belfry_types::{BelfryError, ClockId};
use tracing::{debug, info};

use crate::driver::{MotorDriver, StopButton};
use crate::pins::PinMap;

fn gpio_cmd(args: &[String]) -> Result<String, BelfryError> {
    let output = Command::new("gpio").args(args).output().map_err(|e| {
        BelfryError::Hardware {
            component: "gpio".to_string(),
            details: format!("failed to run wiringOP gpio binary: {e}"),
        }
    })?;
    if !output.status.success() {
        return Err(BelfryError::Hardware {
            component: "gpio".to_string(),
            details: format!(
                "gpio {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn set_mode(pin: u8, mode: &str) -> Result<(), BelfryError> {
    gpio_cmd(&["mode".to_string(), pin.to_string(), mode.to_string()])?;
    debug!(pin, mode, "pin mode configured");
    Ok(())
}

fn write_pin(pin: u8, value: u8) -> Result<(), BelfryError> {
    gpio_cmd(&["write".to_string(), pin.to_string(), value.to_string()])?;
    Ok(())
}

fn read_pin(pin: u8) -> Result<u8, BelfryError> {
    let out = gpio_cmd(&["read".to_string(), pin.to_string()])?;
    out.trim().parse::<u8>().map_err(|_| BelfryError::Hardware {
        component: "gpio".to_string(),
        details: format!("unparseable gpio read output for pin {pin}: {out:?}"),
    })
}

/// L298N motor driver over the wiringOP CLI.
///
/// The IN1–IN4 direction pairs are written once at open and stay fixed;
/// runtime control only toggles the ENA/ENB enable pins. Duty is carried
/// as state by the Safety Gate — this backend is on/off drive, so any
/// enabled channel with duty > 0 energises its enable pin.
pub struct WiringOpDriver {
    pins: PinMap,
}

impl WiringOpDriver {
    /// Configure every output pin and force both channels off.
    ///
    /// # Errors
    ///
    /// Returns [`BelfryError::Hardware`] when the `gpio` binary is missing
    /// or any pin setup command fails. Opening must succeed before the
    /// controller accepts any request; the daemon treats this as fatal.
    pub fn open(pins: PinMap) -> Result<Self, BelfryError> {
        info!("initialising wiringOP pins for L298N");
        for pin in [pins.ena, pins.enb, pins.in1, pins.in2, pins.in3, pins.in4] {
            set_mode(pin, "out")?;
        }
        // Motors off before the direction pins settle.
        write_pin(pins.ena, 0)?;
        write_pin(pins.enb, 0)?;

        let (in1, in2) = pins.motor_a_direction;
        let (in3, in4) = pins.motor_b_direction;
        write_pin(pins.in1, in1)?;
        write_pin(pins.in2, in2)?;
        write_pin(pins.in3, in3)?;
        write_pin(pins.in4, in4)?;

        info!("wiringOP init complete, both motors off");
        Ok(Self { pins })
    }

    fn enable_pin(&self, channel: ClockId) -> u8 {
        match channel {
            ClockId::One => self.pins.ena,
            ClockId::Two => self.pins.enb,
        }
    }
}

impl MotorDriver for WiringOpDriver {
    fn set_channel(&mut self, channel: ClockId, enabled: bool, duty: u8) -> Result<(), BelfryError> {
        let level = u8::from(enabled && duty > 0);
        write_pin(self.enable_pin(channel), level)?;
        debug!(%channel, enabled, duty, level, "enable pin written");
        Ok(())
    }
}

/// The STOP button on a wiringOP input pin, active low with pull-up.
pub struct WiringOpButton {
    pin: u8,
}

impl WiringOpButton {
    /// Configure the button pin as a pulled-up input.
    pub fn open(pins: &PinMap) -> Result<Self, BelfryError> {
        set_mode(pins.stop_button, "in")?;
        set_mode(pins.stop_button, "up")?;
        Ok(Self {
            pin: pins.stop_button,
        })
    }
}

impl StopButton for WiringOpButton {
    fn is_pressed(&mut self) -> Result<bool, BelfryError> {
        // Pull-up wiring: the line reads 0 while the button is held.
        Ok(read_pin(self.pin)? == 0)
    }
}
