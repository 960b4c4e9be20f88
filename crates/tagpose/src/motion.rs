//! Velocity commands for a differential-drive base.

use std::fmt;
use std::time::Duration;

/// Discrete motion command as received on the command channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Left,
    ForwardLeft,
    Forward,
    ForwardRight,
    Right,
    SlowLeft,
    SlowRight,
    Stop,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command payload is not an integer: {0:?}")]
    Malformed(String),
    #[error("unsupported command code {0}")]
    Unsupported(i64),
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Left,
        Command::ForwardLeft,
        Command::Forward,
        Command::ForwardRight,
        Command::Right,
        Command::SlowLeft,
        Command::SlowRight,
        Command::Stop,
    ];

    pub fn code(self) -> i64 {
        match self {
            Command::Left => 0,
            Command::ForwardLeft => 1,
            Command::Forward => 2,
            Command::ForwardRight => 3,
            Command::Right => 4,
            Command::SlowLeft => 5,
            Command::SlowRight => 6,
            Command::Stop => -1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, CommandError> {
        Command::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or(CommandError::Unsupported(code))
    }

    /// Parse a decimal payload such as `b"2"` or `b"-1\n"`.
    pub fn parse_payload(payload: &[u8]) -> Result<Self, CommandError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| CommandError::Malformed(String::from_utf8_lossy(payload).into_owned()))?;
        let code = text
            .trim()
            .parse::<i64>()
            .map_err(|_| CommandError::Malformed(text.to_string()))?;
        Self::from_code(code)
    }

    /// Linear (m/s) and angular (rad/s) velocity for this command.
    pub fn velocity(self) -> Velocity {
        let (linear, angular) = match self {
            Command::Left => (0.0, 0.3),
            Command::ForwardLeft => (0.1, 0.2),
            Command::Forward => (0.1, 0.0),
            Command::ForwardRight => (0.1, -0.2),
            Command::Right => (0.0, -0.3),
            Command::SlowLeft => (0.0, 0.2),
            Command::SlowRight => (0.0, -0.2),
            Command::Stop => (0.0, 0.0),
        };
        Velocity { linear, angular }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Left => "LEFT",
            Command::ForwardLeft => "FORWARDLEFT",
            Command::Forward => "FORWARD",
            Command::ForwardRight => "FORWARDRIGHT",
            Command::Right => "RIGHT",
            Command::SlowLeft => "SLOW_LEFT",
            Command::SlowRight => "SLOW_RIGHT",
            Command::Stop => "STOP",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Velocity {
    pub linear: f64,
    pub angular: f64,
}

impl Velocity {
    pub const ZERO: Velocity = Velocity {
        linear: 0.0,
        angular: 0.0,
    };
}

/// Planar pose integrated from commanded velocities.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Odometry {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl Odometry {
    /// Unicycle step, midpoint heading.
    pub fn advance(&mut self, v: Velocity, dt: Duration) {
        let dt = dt.as_secs_f64();
        let mid = self.heading + 0.5 * v.angular * dt;
        self.x += v.linear * dt * mid.cos();
        self.y += v.linear * dt * mid.sin();
        self.heading += v.angular * dt;
    }
}

/// Something that accepts base velocity setpoints.
pub trait DifferentialBase {
    fn set_base_control(&mut self, linear: f64, angular: f64);
}

/// Base that logs setpoint changes and tracks dead-reckoned odometry.
#[derive(Debug, Default)]
pub struct LoggingBase {
    last: Option<Velocity>,
    odometry: Odometry,
    period: Duration,
}

impl LoggingBase {
    pub fn new(period: Duration) -> Self {
        Self {
            last: None,
            odometry: Odometry::default(),
            period,
        }
    }

    pub fn odometry(&self) -> Odometry {
        self.odometry
    }

    pub fn last_setpoint(&self) -> Option<Velocity> {
        self.last
    }
}

impl DifferentialBase for LoggingBase {
    fn set_base_control(&mut self, linear: f64, angular: f64) {
        let v = Velocity { linear, angular };
        if self.last != Some(v) {
            log::info!("base setpoint: vx={linear:.2} m/s wz={angular:.2} rad/s");
            self.last = Some(v);
        }
        self.odometry.advance(v, self.period);
        log::trace!(
            "odometry x={:.3} y={:.3} heading={:.3}",
            self.odometry.x,
            self.odometry.y,
            self.odometry.heading
        );
    }
}

/// Holds the current command's velocity and pushes it to the base.
pub struct MotionController<B: DifferentialBase> {
    base: B,
    velocity: Velocity,
    last_command: Option<Command>,
}

impl<B: DifferentialBase> MotionController<B> {
    pub fn new(base: B) -> Self {
        Self {
            base,
            velocity: Velocity::ZERO,
            last_command: None,
        }
    }

    pub fn velocity(&self) -> Velocity {
        self.velocity
    }

    pub fn last_command(&self) -> Option<Command> {
        self.last_command
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn apply(&mut self, command: Command) {
        log::info!("{command}");
        self.velocity = command.velocity();
        self.last_command = Some(command);
    }

    /// Bad payloads leave the current velocity untouched.
    pub fn handle_payload(&mut self, payload: &[u8]) -> Result<Command, CommandError> {
        match Command::parse_payload(payload) {
            Ok(command) => {
                self.apply(command);
                Ok(command)
            }
            Err(e) => {
                log::warn!("ignoring command: {e}");
                Err(e)
            }
        }
    }

    /// Push the held velocity to the base.
    pub fn tick(&mut self) {
        self.base
            .set_base_control(self.velocity.linear, self.velocity.angular);
    }

    /// Zero the base and give it back.
    pub fn shutdown(mut self) -> B {
        self.velocity = Velocity::ZERO;
        self.base.set_base_control(0.0, 0.0);
        self.base
    }
}
