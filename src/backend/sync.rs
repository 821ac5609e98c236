// Synchronization primitives
//
// Single frame in flight: one fence guards image acquisition and every
// submit/present is followed by a queue-idle wait, so no semaphores exist.

use anyhow::{Context, Result};
use ash::vk;

/// Where the frame currently is in the acquire/record/submit/present cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

impl FrameState {
    /// The only state that may follow this one
    pub fn next(self) -> FrameState {
        match self {
            FrameState::Idle => FrameState::Acquiring,
            FrameState::Acquiring => FrameState::Recording,
            FrameState::Recording => FrameState::Submitted,
            FrameState::Submitted => FrameState::Presenting,
            FrameState::Presenting => FrameState::Idle,
        }
    }

    pub fn advance(&mut self, to: FrameState) -> Result<()> {
        anyhow::ensure!(
            self.next() == to,
            "Illegal frame transition {:?} -> {:?}",
            self,
            to
        );
        *self = to;
        Ok(())
    }
}

pub struct FrameSync {
    pub image_acquired: vk::Fence,
    pub image_index: u32,
    pub state: FrameState,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        // Unsignaled: the first acquire signals it.
        let fence_info = vk::FenceCreateInfo::builder();

        let image_acquired = unsafe {
            device.create_fence(&fence_info, None)
                .context("Failed to create acquire fence")?
        };

        Ok(Self {
            image_acquired,
            image_index: 0,
            state: FrameState::Idle,
        })
    }

    /// Block until the acquire fence signals, then reset it for the next frame
    pub fn wait_acquired(&self, device: &ash::Device) -> Result<()> {
        unsafe {
            device.wait_for_fences(&[self.image_acquired], true, u64::MAX)
                .context("Failed waiting for acquire fence")?;
            device.reset_fences(&[self.image_acquired])
                .context("Failed to reset acquire fence")?;
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        if self.image_acquired == vk::Fence::null() {
            return;
        }
        unsafe { device.destroy_fence(self.image_acquired, None) };
        self.image_acquired = vk::Fence::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_returns_to_idle() {
        let mut state = FrameState::Idle;
        for to in [
            FrameState::Acquiring,
            FrameState::Recording,
            FrameState::Submitted,
            FrameState::Presenting,
            FrameState::Idle,
        ] {
            state.advance(to).unwrap();
        }
        assert_eq!(state, FrameState::Idle);
    }

    #[test]
    fn skipping_a_step_is_rejected() {
        let mut state = FrameState::Idle;
        assert!(state.advance(FrameState::Recording).is_err());
        assert_eq!(state, FrameState::Idle);

        state.advance(FrameState::Acquiring).unwrap();
        assert!(state.advance(FrameState::Submitted).is_err());
        assert!(state.advance(FrameState::Idle).is_err());
        assert_eq!(state, FrameState::Acquiring);
    }

    #[test]
    fn no_state_follows_itself() {
        for state in [
            FrameState::Idle,
            FrameState::Acquiring,
            FrameState::Recording,
            FrameState::Submitted,
            FrameState::Presenting,
        ] {
            assert_ne!(state.next(), state);
        }
    }
}
