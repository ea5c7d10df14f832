use chrono::Duration;

pub trait Truncate {
    fn truncate_to_seconds(&self) -> Duration;
}

impl Truncate for Duration {
    fn truncate_to_seconds(&self) -> Duration {
        Duration::seconds(self.num_seconds())
    }
}

/// Fractional seconds, for lap times shown as `4.27s`.
pub trait Seconds {
    fn as_secs_f64(&self) -> f64;
}

impl Seconds for Duration {
    fn as_secs_f64(&self) -> f64 {
        match self.num_microseconds() {
            Some(micros) => micros as f64 / 1_000_000.0,
            None => self.num_seconds() as f64,
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::{Seconds, Truncate};

    #[test]
    fn truncate_to_seconds() {
        let d = Duration::milliseconds(1234);
        let expected = Duration::seconds(1);
        let actual = d.truncate_to_seconds();
        assert_eq!(actual, expected);
    }

    #[test]
    fn fractional_seconds() {
        assert_eq!(Duration::milliseconds(4250).as_secs_f64(), 4.25);
        assert_eq!(Duration::zero().as_secs_f64(), 0.0);
    }
}
