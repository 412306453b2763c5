//! Register I/O.
//!
//! Besides plain MAC register access, the RT2860 has three indirect register files. The BBP is
//! reached through an agent register, which the MCU executes once it's kicked through the host
//! command mailbox. The RF chip is written through a serial interface and the MCU itself is
//! commanded through the mailbox. Every one of these protocols polls a busy flag, so every poll
//! here is bounded and fails with [DeviceError::Timeout].

use crate::{
    bus::Bus,
    device::{DeviceError, WaitTarget},
    regs::*,
};

/// Register level helpers, which are available on every [Bus].
pub(crate) trait RegisterIo: Bus {
    /// Set `bits` in a register.
    fn set32(&self, offset: u32, bits: u32) {
        self.write32(offset, self.read32(offset) | bits);
    }
    /// Clear `bits` in a register.
    fn clear32(&self, offset: u32, bits: u32) {
        self.write32(offset, self.read32(offset) & !bits);
    }
    /// Poll `offset` until `done` returns true, `tries` times with `delay_us` in between.
    ///
    /// Returns the last value read.
    fn poll32(
        &self,
        offset: u32,
        tries: usize,
        delay_us: u32,
        target: WaitTarget,
        done: impl Fn(u32) -> bool,
    ) -> Result<u32, DeviceError> {
        for _ in 0..tries {
            let value = self.read32(offset);
            if done(value) {
                return Ok(value);
            }
            self.delay_us(delay_us);
        }
        error!("Timed out waiting for {:?}.", target);
        Err(DeviceError::Timeout(target))
    }

    /// Wait until neither DMA engine is busy.
    fn wait_dma_idle(&self, tries: usize) -> Result<u32, DeviceError> {
        self.poll32(WPDMA_GLO_CFG, tries, 1000, WaitTarget::DmaIdle, |value| {
            value & (TX_DMA_BUSY | RX_DMA_BUSY) == 0
        })
    }
    /// Wait until the MAC neither transmits nor receives.
    fn wait_mac_idle(&self) -> Result<(), DeviceError> {
        self.poll32(MAC_STATUS, 100, 1000, WaitTarget::MacIdle, |value| {
            value & (TX_STATUS_BUSY | RX_STATUS_BUSY) == 0
        })
        .map(|_| ())
    }

    /// Send a command to the MCU.
    fn mcu_cmd(&self, cmd: u8, token: u8, arg: u16) -> Result<(), DeviceError> {
        self.poll32(H2M_MAILBOX, 100, 2, WaitTarget::Mailbox, |value| {
            value & H2M_BUSY == 0
        })?;
        self.write32(
            H2M_MAILBOX,
            H2M_BUSY | (token as u32) << H2M_TOKEN_SHIFT | arg as u32,
        );
        self.write32(H2M_HOST_CMD, cmd as u32);
        Ok(())
    }

    /// Read a BBP register through the MCU.
    fn bbp_read(&self, reg: u8) -> Result<u8, DeviceError> {
        self.poll32(H2M_BBPAGENT, 100, 1, WaitTarget::Bbp, |value| {
            value & BBP_CSR_BUSY == 0
        })?;
        self.write32(
            H2M_BBPAGENT,
            BBP_RW_MODE_PARALLEL | BBP_CSR_BUSY | BBP_CSR_READ | (reg as u32) << BBP_REG_SHIFT,
        );
        self.mcu_cmd(MCU_CMD_BBP, 0, 0)?;
        self.delay_us(1000);
        let value = self.poll32(H2M_BBPAGENT, 100, 1, WaitTarget::Bbp, |value| {
            value & BBP_CSR_BUSY == 0
        })?;
        Ok((value & BBP_VAL_MASK) as u8)
    }
    /// Write a BBP register through the MCU.
    fn bbp_write(&self, reg: u8, value: u8) -> Result<(), DeviceError> {
        self.poll32(H2M_BBPAGENT, 100, 1, WaitTarget::Bbp, |value| {
            value & BBP_CSR_BUSY == 0
        })?;
        self.write32(
            H2M_BBPAGENT,
            BBP_RW_MODE_PARALLEL | BBP_CSR_BUSY | (reg as u32) << BBP_REG_SHIFT | value as u32,
        );
        self.mcu_cmd(MCU_CMD_BBP, 0, 0)?;
        self.delay_us(1000);
        Ok(())
    }

    /// Write one of the four 22-bit RF registers.
    fn rf_write(&self, reg: u8, value: u32) -> Result<(), DeviceError> {
        self.poll32(RF_CSR_CFG0, 100, 1, WaitTarget::Rf, |value| {
            value & RF_BUSY == 0
        })?;
        self.write32(
            RF_CSR_CFG0,
            RF_BUSY | 24 << RF_BITS_SHIFT | (value & 0x3f_ffff) << 2 | (reg as u32 & 3),
        );
        Ok(())
    }

    /// Read a pair of 16-bit counters from a read-to-clear register.
    ///
    /// Returns `(low, high)`.
    fn read_counter_pair(&self, offset: u32) -> (u32, u32) {
        let value = self.read32(offset);
        (value & 0xffff, value >> 16)
    }

    /// Load the MCU microcode and wait for the MCU to come up.
    fn load_firmware(&self, image: &[u8]) -> Result<(), DeviceError> {
        if image.is_empty() || image.len() % 4 != 0 || image.len() > MCU_UCODE_MAX_SIZE {
            error!("Rejecting firmware image of {} bytes.", image.len());
            return Err(DeviceError::Firmware);
        }
        self.write32(PBF_SYS_CTRL, HST_PM_SEL);
        for (i, word) in image.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            self.write32(MCU_UCODE_BASE + (i as u32) * 4, word);
        }
        self.write32(PBF_SYS_CTRL, MCU_RESET);
        self.write32(PBF_SYS_CTRL, 0);
        self.write32(H2M_BBPAGENT, 0);
        self.write32(H2M_MAILBOX, 0);
        self.poll32(PBF_SYS_CTRL, 1000, 1000, WaitTarget::McuReady, |value| {
            value & MCU_READY != 0
        })?;
        debug!("MCU is up after loading {} bytes of firmware.", image.len());
        Ok(())
    }
}
impl<B: Bus + ?Sized> RegisterIo for B {}
