//! Adapter from `embedded-hal` PWM peripherals to [`PwmChannel`].

use crate::PwmChannel;
use embedded_hal::pwm::SetDutyCycle;

/// Wraps any `embedded-hal` [`SetDutyCycle`] implementation as a
/// [`PwmChannel`].
///
/// The capability trait is infallible by contract, so peripheral write
/// errors are swallowed here; the last successfully requested duty is
/// retained for read-back.
pub struct EhalPwm<T> {
    inner: T,
    duty: u16,
}

impl<T: SetDutyCycle> EhalPwm<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, duty: 0 }
    }

    /// Consumes the adapter, returning the wrapped peripheral.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: SetDutyCycle> PwmChannel for EhalPwm<T> {
    fn set_duty(&mut self, duty: u16) {
        let clamped = duty.min(self.inner.max_duty_cycle());
        if self.inner.set_duty_cycle(clamped).is_ok() {
            self.duty = clamped;
        }
    }

    fn duty(&self) -> u16 {
        self.duty
    }

    fn max_duty(&self) -> u16 {
        self.inner.max_duty_cycle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    struct FakePwm {
        duty: u16,
    }

    impl embedded_hal::pwm::ErrorType for FakePwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for FakePwm {
        fn max_duty_cycle(&self) -> u16 {
            1023
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
            self.duty = duty;
            Ok(())
        }
    }

    #[test]
    fn clamps_to_peripheral_range() {
        let mut pwm = EhalPwm::new(FakePwm { duty: 0 });
        pwm.set_duty(5000);
        assert_eq!(pwm.duty(), 1023);
        assert_eq!(pwm.into_inner().duty, 1023);
    }
}
