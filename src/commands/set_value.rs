//! `set-value`: fan speed, power cap, and performance level control.

use std::io::{self, BufRead, Write};

use clap::Args;
use serde_json::json;

use crate::commands::{for_each_device, CommandContext, GpuArgs};
use crate::error::{AmdSmiError, Result};
use crate::smi::PerfLevel;

#[derive(Debug, Clone, Default, Args)]
pub struct SetValueArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,

    /// Fan speed as a PWM level (0-255) or a percentage (e.g. 40%)
    #[arg(short = 'f', long, value_name = "SPEED")]
    pub fan: Option<String>,

    /// Power cap in watts
    #[arg(short = 'p', long = "power-cap", value_name = "WATTS")]
    pub power_cap: Option<u32>,

    /// Performance level (auto, low, high, manual)
    #[arg(short = 'l', long = "perf-level", value_name = "LEVEL")]
    pub perf_level: Option<String>,

    /// Skip the out-of-spec confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

pub fn run(ctx: &mut CommandContext<'_>, args: &SetValueArgs) -> Result<()> {
    if args.fan.is_none() && args.power_cap.is_none() && args.perf_level.is_none() {
        return Err(AmdSmiError::InvalidArgument(
            "set-value requires at least one of --fan, --power-cap, --perf-level".into(),
        ));
    }

    let fan = args.fan.as_deref().map(parse_fan_speed).transpose()?;
    let perf_level = args
        .perf_level
        .as_deref()
        .map(|l| {
            PerfLevel::parse(l).ok_or_else(|| {
                AmdSmiError::InvalidArgument(format!(
                    "'{l}' is not a performance level (auto, low, high, manual)"
                ))
            })
        })
        .transpose()?;

    // Fan and power changes can push the device out of spec.
    if (fan.is_some() || args.power_cap.is_some()) && !args.yes && !confirm_out_of_spec()? {
        return Err(AmdSmiError::InvalidArgument("not confirmed".into()));
    }

    for_each_device(ctx, &args.gpu.gpu, |backend, logger, entry| {
        if let Some(speed) = fan {
            backend.set_fan_speed(entry.handle, speed)?;
            logger.store(
                entry.index,
                "fan",
                json!(format!("Successfully set fan speed to {speed}")),
            );
        }
        if let Some(watts) = args.power_cap {
            backend.set_power_cap(entry.handle, watts)?;
            logger.store(
                entry.index,
                "power_cap",
                json!(format!("Successfully set power cap to {watts} W")),
            );
        }
        if let Some(level) = perf_level {
            backend.set_perf_level(entry.handle, level)?;
            logger.store(
                entry.index,
                "perf_level",
                json!(format!("Successfully set performance level to {}", level.as_str())),
            );
        }
        Ok(())
    })?;
    ctx.logger.flush()
}

/// Accept a raw PWM level (`0-255`) or a percentage (`40%`).
fn parse_fan_speed(input: &str) -> Result<u32> {
    let speed = if let Some(percent) = input.strip_suffix('%') {
        let percent: u32 = percent
            .trim()
            .parse()
            .map_err(|_| AmdSmiError::InvalidArgument(format!("invalid fan percentage '{input}'")))?;
        if percent > 100 {
            return Err(AmdSmiError::InvalidArgument(format!(
                "fan percentage {percent} exceeds 100"
            )));
        }
        (percent * 255 + 50) / 100
    } else {
        input
            .trim()
            .parse()
            .map_err(|_| AmdSmiError::InvalidArgument(format!("invalid fan speed '{input}'")))?
    };
    if speed > 255 {
        return Err(AmdSmiError::InvalidArgument(format!(
            "fan speed {speed} out of range (0-255)"
        )));
    }
    Ok(speed)
}

fn confirm_out_of_spec() -> Result<bool> {
    let mut err = io::stderr();
    writeln!(
        err,
        "          ****** WARNING ******\n\
         Operating your AMD GPU outside of official AMD specifications or outside of\n\
         factory settings may damage your graphics card and void its warranty."
    )?;
    write!(err, "Do you accept these terms? [y/N] ")?;
    err.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES"))
}
