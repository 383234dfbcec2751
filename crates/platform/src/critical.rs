//! Scoped interrupt suppression.
//!
//! Every diagnostic runs with interrupts off and must hand them back in the
//! state it found them, including on failure paths. The guard owns the HAL
//! borrow for its lifetime, so the restore cannot be skipped or reordered
//! before the last hardware access of the diagnostic.

use core::ops::{Deref, DerefMut};

use crate::cpu::InterruptControl;

/// Interrupt-free section over a borrowed HAL.
///
/// Dereferences to the HAL so the diagnostic keeps full access while the
/// section is open.
pub struct InterruptFreeSection<'a, H: InterruptControl + ?Sized> {
    hal: &'a mut H,
    restore: bool,
}

impl<'a, H: InterruptControl + ?Sized> InterruptFreeSection<'a, H> {
    /// Disable interrupts and remember the previous enable state.
    pub fn enter(hal: &'a mut H) -> Self {
        let restore = hal.disable_interrupts();
        Self { hal, restore }
    }

    /// Whether interrupts will be re-enabled on exit.
    pub fn restores_interrupts(&self) -> bool {
        self.restore
    }

    /// Close the section without touching the interrupt state, for a device
    /// that reset inside it. The reset already put the CPU in its power-on
    /// state and nothing after the reset may run the restore.
    pub fn abandon(self) {
        core::mem::forget(self);
    }
}

impl<H: InterruptControl + ?Sized> Deref for InterruptFreeSection<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.hal
    }
}

impl<H: InterruptControl + ?Sized> DerefMut for InterruptFreeSection<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.hal
    }
}

impl<H: InterruptControl + ?Sized> Drop for InterruptFreeSection<'_, H> {
    fn drop(&mut self) {
        self.hal.set_interrupts_enabled(self.restore);
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    struct Flag(bool);

    impl InterruptControl for Flag {
        fn interrupts_enabled(&self) -> bool {
            self.0
        }
        fn set_interrupts_enabled(&mut self, enabled: bool) {
            self.0 = enabled;
        }
    }

    #[test]
    fn section_restores_enabled_state() {
        let mut f = Flag(true);
        {
            let s = InterruptFreeSection::enter(&mut f);
            assert!(!s.interrupts_enabled());
            assert!(s.restores_interrupts());
        }
        assert!(f.0);
    }

    #[test]
    fn section_keeps_disabled_state_disabled() {
        let mut f = Flag(false);
        {
            let mut s = InterruptFreeSection::enter(&mut f);
            // Code inside the section may flip the bit; exit still restores.
            s.set_interrupts_enabled(true);
        }
        assert!(!f.0);
    }

    #[test]
    fn abandoned_section_leaves_state_alone() {
        let mut f = Flag(true);
        let s = InterruptFreeSection::enter(&mut f);
        s.abandon();
        assert!(!f.0);
    }

    #[test]
    fn early_return_still_restores() {
        fn bail(f: &mut Flag) -> Result<(), ()> {
            let _s = InterruptFreeSection::enter(f);
            Err(())
        }
        let mut f = Flag(true);
        assert!(bail(&mut f).is_err());
        assert!(f.0);
    }
}
