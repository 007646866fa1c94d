use std::fmt;
use std::time::Duration;

/// A flow parameter set that cannot be used for pacing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    #[error("buffer size {0} is negative or not finite")]
    BufferSize(f64),

    #[error("{field} of {value}ms is negative or not finite")]
    Duration { field: &'static str, value: f64 },

    #[error("interval {interval}ms is greater than on duration {on}ms")]
    IntervalExceedsOn { interval: f64, on: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowShape {
    Simple,
    OnOff { on: Duration, off: Duration },
}

/// Traffic shape applied to a client port while its FSM sits in a given state.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    name: String,
    buffer_size: usize,
    /// Interval as configured, in fractional milliseconds.
    interval_ms: f64,
    shape: FlowShape,
    /// On/off durations as configured, kept for trace args.
    duty_ms: Option<(f64, f64)>,
}

fn checked_ms(field: &'static str, value: f64) -> Result<Duration, FlowError> {
    Duration::try_from_secs_f64(value / 1000.0).map_err(|_| FlowError::Duration { field, value })
}

fn checked_buffer(buffer_size: f64) -> Result<usize, FlowError> {
    if !buffer_size.is_finite() || buffer_size < 0.0 {
        return Err(FlowError::BufferSize(buffer_size));
    }
    Ok(buffer_size as usize)
}

impl Flow {
    pub fn simple(name: impl Into<String>, buffer_size: f64, interval_ms: f64) -> Result<Self, FlowError> {
        checked_ms("interval", interval_ms)?;
        Ok(Self {
            name: name.into(),
            buffer_size: checked_buffer(buffer_size)?,
            interval_ms,
            shape: FlowShape::Simple,
            duty_ms: None,
        })
    }

    /// An on/off flow; rejected when `interval_ms > on_ms`.
    pub fn on_off(
        name: impl Into<String>,
        buffer_size: f64,
        interval_ms: f64,
        on_ms: f64,
        off_ms: f64,
    ) -> Result<Self, FlowError> {
        checked_ms("interval", interval_ms)?;
        let on = checked_ms("on duration", on_ms)?;
        let off = checked_ms("off duration", off_ms)?;
        if interval_ms > on_ms {
            return Err(FlowError::IntervalExceedsOn {
                interval: interval_ms,
                on: on_ms,
            });
        }

        Ok(Self {
            name: name.into(),
            buffer_size: checked_buffer(buffer_size)?,
            interval_ms,
            shape: FlowShape::OnOff { on, off },
            duty_ms: Some((on_ms, off_ms)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn shape(&self) -> FlowShape {
        self.shape
    }

    /// Pacing interval split into whole milliseconds and the sub-millisecond remainder.
    pub fn interval_parts(&self) -> (u64, Duration) {
        let whole = self.interval_ms.trunc();
        let remainder_us = ((self.interval_ms - whole) * 1000.0).round() as u64;
        (whole as u64, Duration::from_micros(remainder_us))
    }

    pub fn interval(&self) -> Duration {
        let (whole, remainder) = self.interval_parts();
        Duration::from_millis(whole) + remainder
    }

    /// Trace arguments describing this flow as seen by `fsm`.
    pub fn trace_args(&self, fsm: &str) -> Vec<String> {
        let mut args = vec![
            self.shape_label().to_string(),
            fsm.to_string(),
            self.buffer_size.to_string(),
            self.interval_ms.to_string(),
        ];
        if let Some((on, off)) = self.duty_ms {
            args.push(on.to_string());
            args.push(off.to_string());
        }
        args
    }

    fn shape_label(&self) -> &'static str {
        match self.shape {
            FlowShape::Simple => "simple",
            FlowShape::OnOff { .. } => "on_off",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}B every {}ms)",
            self.name,
            self.shape_label(),
            self.buffer_size,
            self.interval_ms
        )
    }
}
