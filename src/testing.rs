//! A simulated RT2860 and MAC layer for the tests.
//!
//! [FakeBus] keeps the registers and the memory shared with the device in a map and emulates the
//! parts of the hardware the core depends on: the DMA index registers, the write one to clear
//! interrupt status, the read to clear counters, the MCU mailbox, the BBP agent and the RF serial
//! interface. The DMA engines are driven explicitly by the tests through [FakeBus::hw_transmit]
//! and [FakeBus::hw_receive].

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use ieee80211::mac_parser::MACAddress;

use crate::{
    bus::{Bus, BusError, CoherentRegion, DmaError, DmaSegment, ScatterList},
    config::{Calibration, DeviceConfig},
    device::Device,
    frame::{tests::data, tests::STA, OutboundFrame, RxFrame},
    mac::{MacLayer, RxTarget, TxCompletion, TxStatus},
    node::{HtCapabilities, Node, NodeRef},
    phy::Rate,
    regs::*,
    ring::{Descriptor, DESCRIPTOR_SIZE, SDL0_DDONE, SDL0_LAST_SEGMENT, SDL1_LAST_SEGMENT},
    tx::TxQueue,
    wi::RxWi,
    MAX_SCATTER,
};

/// The firmware image used by the test devices.
pub(crate) const FIRMWARE: [u8; 8] = [0x02, 0x00, 0x30, 0x12, 0x00, 0x00, 0x00, 0x00];
const MAC_REVISION: u32 = 0x2860_0102;
const BBP_VERSION: u8 = 0x24;
const ADDRESS_ALIGNMENT: u32 = 0x1000;

struct FakeBusState {
    regs: BTreeMap<u32, u32>,
    bbp: [u8; 256],
    rf_writes: Vec<(u8, u32)>,
    writes: Vec<(u32, u32)>,
    tx_status: VecDeque<u32>,
    /// Coherent regions by their bus address.
    coherent: BTreeMap<u32, Vec<u8>>,
    /// Streaming mappings by their bus address. The flag is set for RX mappings.
    mappings: BTreeMap<u32, (Vec<u8>, bool)>,
    next_address: u32,
    max_segments: usize,
    failing_mappings: usize,
    failing_buffers: usize,
    coherent_budget: Option<usize>,
    fail_interrupt_setup: bool,
    mailbox_stuck: bool,
    mcu_ready: bool,
    dma_busy: bool,
    mac_revision: u32,
    acquired: bool,
    interrupt_registered: bool,
    firmware_loads: usize,
}
impl FakeBusState {
    fn allocate_address(&mut self, length: usize) -> u32 {
        let address = self.next_address;
        self.next_address += (length as u32).next_multiple_of(ADDRESS_ALIGNMENT) + ADDRESS_ALIGNMENT;
        address
    }
    fn reg(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or_default()
    }
    /// Find the memory backing `address`, returning it together with the offset into it.
    fn memory(&mut self, address: u32) -> (&mut Vec<u8>, usize) {
        let coherent = self
            .coherent
            .range(..=address)
            .next_back()
            .filter(|(base, memory)| ((address - **base) as usize) < memory.len())
            .map(|(base, _)| *base);
        if let Some(base) = coherent {
            let memory = self.coherent.get_mut(&base).unwrap();
            return (memory, (address - base) as usize);
        }
        let (base, (memory, _)) = self
            .mappings
            .range_mut(..=address)
            .next_back()
            .unwrap_or_else(|| panic!("Device access to unmapped address {address:#x}."));
        let offset = (address - *base) as usize;
        assert!(offset < memory.len(), "Device access to unmapped address {address:#x}.");
        (memory, offset)
    }
    fn read_memory(&mut self, address: u32, length: usize) -> Vec<u8> {
        let (memory, offset) = self.memory(address);
        memory[offset..offset + length].to_vec()
    }
    fn write_memory(&mut self, address: u32, bytes: &[u8]) {
        let (memory, offset) = self.memory(address);
        let length = bytes.len().min(memory.len() - offset);
        memory[offset..offset + length].copy_from_slice(&bytes[..length]);
    }
    fn descriptor(&mut self, address: u32) -> Descriptor {
        let bytes = self.read_memory(address, DESCRIPTOR_SIZE);
        Descriptor::from_bytes(bytes.as_slice().try_into().unwrap())
    }
    fn execute_bbp_agent(&mut self) {
        let agent = self.reg(H2M_BBPAGENT);
        let reg = ((agent >> BBP_REG_SHIFT) & 0xff) as usize;
        let agent = if agent & BBP_CSR_READ != 0 {
            (agent & !BBP_VAL_MASK) | self.bbp[reg] as u32
        } else {
            self.bbp[reg] = (agent & BBP_VAL_MASK) as u8;
            agent
        };
        self.regs.insert(H2M_BBPAGENT, agent & !BBP_CSR_BUSY);
    }
}

/// A simulated RT2860 on a simulated bus.
pub(crate) struct FakeBus {
    state: Mutex<FakeBusState>,
}
impl FakeBus {
    pub fn new() -> Self {
        let mut bbp = [0; 256];
        bbp[0] = BBP_VERSION;
        Self {
            state: Mutex::new(FakeBusState {
                regs: BTreeMap::new(),
                bbp,
                rf_writes: Vec::new(),
                writes: Vec::new(),
                tx_status: VecDeque::new(),
                coherent: BTreeMap::new(),
                mappings: BTreeMap::new(),
                next_address: 0x1000_0000,
                max_segments: MAX_SCATTER,
                failing_mappings: 0,
                failing_buffers: 0,
                coherent_budget: None,
                fail_interrupt_setup: false,
                mailbox_stuck: false,
                mcu_ready: true,
                dma_busy: false,
                mac_revision: MAC_REVISION,
                acquired: false,
                interrupt_registered: false,
                firmware_loads: 0,
            }),
        }
    }
    fn state(&self) -> MutexGuard<'_, FakeBusState> {
        self.state.lock().unwrap()
    }

    /// The raw register contents, without any read side effects.
    pub fn reg(&self, offset: u32) -> u32 {
        self.state().reg(offset)
    }
    pub fn set_reg(&self, offset: u32, value: u32) {
        self.state().regs.insert(offset, value);
    }
    pub fn raise_interrupt(&self, bits: u32) {
        let mut state = self.state();
        let status = state.reg(INT_STATUS) | bits;
        state.regs.insert(INT_STATUS, status);
    }
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.state().writes.clone()
    }
    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
    pub fn bbp(&self, reg: u8) -> u8 {
        self.state().bbp[reg as usize]
    }
    pub fn set_bbp(&self, reg: u8, value: u8) {
        self.state().bbp[reg as usize] = value;
    }
    pub fn rf_writes(&self) -> Vec<(u8, u32)> {
        self.state().rf_writes.clone()
    }
    pub fn set_mailbox_stuck(&self, stuck: bool) {
        self.state().mailbox_stuck = stuck;
    }
    pub fn set_mcu_ready(&self, ready: bool) {
        self.state().mcu_ready = ready;
    }
    pub fn set_dma_busy(&self, busy: bool) {
        self.state().dma_busy = busy;
    }
    pub fn set_mac_revision(&self, revision: u32) {
        self.state().mac_revision = revision;
    }
    pub fn firmware_loads(&self) -> usize {
        self.state().firmware_loads
    }
    pub fn acquired(&self) -> bool {
        self.state().acquired
    }
    pub fn interrupt_registered(&self) -> bool {
        self.state().interrupt_registered
    }
    pub fn fail_interrupt_setup(&self, fail: bool) {
        self.state().fail_interrupt_setup = fail;
    }

    pub fn coherent_region_count(&self) -> usize {
        self.state().coherent.len()
    }
    /// Only allow `count` more coherent allocations.
    pub fn limit_coherent_allocations(&self, count: usize) {
        self.state().coherent_budget = Some(count);
    }
    /// Streaming mappings for TX.
    pub fn live_mappings(&self) -> usize {
        self.state().mappings.values().filter(|(_, rx)| !rx).count()
    }
    /// Streaming mappings for RX.
    pub fn live_rx_mappings(&self) -> usize {
        self.state().mappings.values().filter(|(_, rx)| *rx).count()
    }
    pub fn set_max_segments(&self, max_segments: usize) {
        self.state().max_segments = max_segments.min(MAX_SCATTER);
    }
    /// Let the next `count` mappings fail.
    pub fn fail_mappings(&self, count: usize) {
        self.state().failing_mappings = count;
    }
    /// Let the next `count` buffer allocations fail.
    pub fn fail_buffer_allocations(&self, count: usize) {
        self.state().failing_buffers = count;
    }
    pub fn push_tx_status(&self, word: u32) {
        self.state().tx_status.push_back(word);
    }

    /// Let the TX DMA engine of `queue` process up to `frames` frames.
    ///
    /// Returns the bytes of every processed frame, as the hardware would have read them.
    pub fn hw_transmit(&self, queue: TxQueue, frames: usize) -> Vec<Vec<u8>> {
        let mut state = self.state();
        let index = queue.index();
        let base = state.reg(tx_base_ptr(index));
        let count = state.reg(tx_max_cnt(index));
        let cpu_index = state.reg(tx_ctx_idx(index));
        let mut dma_index = state.reg(tx_dtx_idx(index));
        let mut transmitted = Vec::new();
        let mut current = Vec::new();
        while transmitted.len() < frames && dma_index != cpu_index {
            let address = base + dma_index * DESCRIPTOR_SIZE as u32;
            let mut descriptor = state.descriptor(address);
            current.extend(state.read_memory(descriptor.sdp0, descriptor.length0() as usize));
            if descriptor.length1() != 0 {
                current.extend(state.read_memory(descriptor.sdp1, descriptor.length1() as usize));
            }
            let last = descriptor.sdl0 & SDL0_LAST_SEGMENT != 0
                || descriptor.sdl1 & SDL1_LAST_SEGMENT != 0;
            descriptor.sdl0 |= SDL0_DDONE;
            state.write_memory(address, &descriptor.to_bytes());
            dma_index = (dma_index + 1) % count;
            if last {
                transmitted.push(core::mem::take(&mut current));
            }
        }
        state.regs.insert(tx_dtx_idx(index), dma_index);
        transmitted
    }
    /// Let the RX DMA engine receive a frame into the next descriptor.
    pub fn hw_receive(&self, rxwi: &RxWi, flags: u32, payload: &[u8]) {
        let mut state = self.state();
        let base = state.reg(RX_BASE_PTR);
        let count = state.reg(RX_MAX_CNT);
        let dma_index = state.reg(RX_DRX_IDX);
        let address = base + dma_index * DESCRIPTOR_SIZE as u32;
        let mut descriptor = state.descriptor(address);
        assert!(!descriptor.is_done(), "RX ring overrun.");
        let mut bytes = rxwi.to_bytes().to_vec();
        bytes.extend_from_slice(payload);
        state.write_memory(descriptor.sdp0, &bytes);
        descriptor.sdl0 |= SDL0_DDONE;
        descriptor.flags = flags;
        state.write_memory(address, &descriptor.to_bytes());
        state.regs.insert(RX_DRX_IDX, (dma_index + 1) % count);
    }
    pub fn rx_descriptor(&self, index: usize) -> Descriptor {
        let mut state = self.state();
        let address = state.reg(RX_BASE_PTR) + (index * DESCRIPTOR_SIZE) as u32;
        state.descriptor(address)
    }
}

impl Bus for FakeBus {
    fn acquire(&self) -> Result<(), BusError> {
        self.state().acquired = true;
        Ok(())
    }
    fn release(&self) {
        self.state().acquired = false;
    }
    fn read32(&self, offset: u32) -> u32 {
        let mut state = self.state();
        let value = state.reg(offset);
        match offset {
            MAC_CSR0 => state.mac_revision,
            WPDMA_GLO_CFG if state.dma_busy => value | TX_DMA_BUSY | RX_DMA_BUSY,
            H2M_MAILBOX if state.mailbox_stuck => value | H2M_BUSY,
            PBF_SYS_CTRL if state.mcu_ready => value | MCU_READY,
            TX_STA_FIFO => state.tx_status.pop_front().unwrap_or_default(),
            RX_STA_CNT0 | RX_STA_CNT1 | RX_STA_CNT2 | TX_STA_CNT0 | TX_STA_CNT1 | TX_STA_CNT2 => {
                state.regs.remove(&offset).unwrap_or_default()
            }
            _ => value,
        }
    }
    fn write32(&self, offset: u32, value: u32) {
        let mut state = self.state();
        state.writes.push((offset, value));
        match offset {
            INT_STATUS => {
                let status = state.reg(INT_STATUS) & !value;
                state.regs.insert(INT_STATUS, status);
            }
            WPDMA_RST_IDX => {
                for queue in 0..TxQueue::ALL.len() {
                    if value & (1 << queue) != 0 {
                        state.regs.insert(tx_dtx_idx(queue), 0);
                    }
                }
                if value & (1 << 16) != 0 {
                    state.regs.insert(RX_DRX_IDX, 0);
                }
                state.regs.insert(offset, value);
            }
            // The MCU picks up every command immediately.
            H2M_MAILBOX => {
                state.regs.insert(offset, value & !H2M_BUSY);
            }
            H2M_HOST_CMD => {
                state.regs.insert(offset, value);
                if value == MCU_CMD_BBP as u32 {
                    state.execute_bbp_agent();
                }
            }
            RF_CSR_CFG0 => {
                state
                    .rf_writes
                    .push(((value & 3) as u8, (value >> 2) & 0x3f_ffff));
                state.regs.insert(offset, value & !RF_BUSY);
            }
            // The busy bits are read only.
            WPDMA_GLO_CFG => {
                state
                    .regs
                    .insert(offset, value & !(TX_DMA_BUSY | RX_DMA_BUSY));
            }
            PBF_SYS_CTRL => {
                if value == HST_PM_SEL {
                    state.firmware_loads += 1;
                }
                state.regs.insert(offset, value);
            }
            _ => {
                state.regs.insert(offset, value);
            }
        }
    }
    fn delay_us(&self, _us: u32) {}

    fn alloc_coherent(&self, length: usize) -> Result<CoherentRegion, BusError> {
        let mut state = self.state();
        if let Some(budget) = state.coherent_budget.as_mut() {
            if *budget == 0 {
                return Err(BusError::NoCoherentMemory);
            }
            *budget -= 1;
        }
        let address = state.allocate_address(length);
        state.coherent.insert(address, vec![0; length]);
        Ok(CoherentRegion {
            address,
            length,
            handle: address as usize,
        })
    }
    fn free_coherent(&self, region: CoherentRegion) {
        assert!(
            self.state().coherent.remove(&region.address).is_some(),
            "Double free of coherent region {:#x}.",
            region.address
        );
    }
    fn read_coherent(&self, region: &CoherentRegion, offset: usize, buffer: &mut [u8]) {
        let state = self.state();
        let memory = &state.coherent[&region.address];
        buffer.copy_from_slice(&memory[offset..offset + buffer.len()]);
    }
    fn write_coherent(&self, region: &CoherentRegion, offset: usize, data: &[u8]) {
        let mut state = self.state();
        let memory = state.coherent.get_mut(&region.address).unwrap();
        memory[offset..offset + data.len()].copy_from_slice(data);
    }

    fn dma_map(&self, buffers: &[&[u8]]) -> Result<ScatterList, DmaError> {
        let mut state = self.state();
        if state.failing_mappings > 0 {
            state.failing_mappings -= 1;
            return Err(DmaError::NoResources);
        }
        let buffers = buffers
            .iter()
            .filter(|buffer| !buffer.is_empty())
            .collect::<Vec<_>>();
        if buffers.len() > state.max_segments {
            return Err(DmaError::TooManySegments);
        }
        let mut segments = ScatterList::new();
        for buffer in buffers {
            let address = state.allocate_address(buffer.len());
            state.mappings.insert(address, (buffer.to_vec(), false));
            segments
                .push(DmaSegment {
                    address,
                    length: buffer.len() as u16,
                })
                .unwrap();
        }
        Ok(segments)
    }
    fn dma_map_rx(&self, buffer: &mut [u8]) -> Result<DmaSegment, DmaError> {
        let mut state = self.state();
        if state.failing_mappings > 0 {
            state.failing_mappings -= 1;
            return Err(DmaError::NoResources);
        }
        let address = state.allocate_address(buffer.len());
        state.mappings.insert(address, (vec![0; buffer.len()], true));
        Ok(DmaSegment {
            address,
            length: buffer.len() as u16,
        })
    }
    fn dma_unmap(&self, segments: &[DmaSegment]) {
        let mut state = self.state();
        for segment in segments {
            assert!(
                state.mappings.remove(&segment.address).is_some(),
                "Unmapping unknown segment {:#x}.",
                segment.address
            );
        }
    }
    fn dma_sync_for_cpu(&self, segment: &DmaSegment, buffer: &mut [u8]) {
        let state = self.state();
        let (memory, _) = &state.mappings[&segment.address];
        let length = buffer.len().min(memory.len());
        buffer[..length].copy_from_slice(&memory[..length]);
    }
    fn alloc_buffer(&self, length: usize) -> Option<Vec<u8>> {
        let mut state = self.state();
        if state.failing_buffers > 0 {
            state.failing_buffers -= 1;
            return None;
        }
        Some(vec![0; length])
    }

    fn setup_interrupt(&self) -> Result<(), BusError> {
        let mut state = self.state();
        if state.fail_interrupt_setup {
            return Err(BusError::InterruptSetup);
        }
        state.interrupt_registered = true;
        Ok(())
    }
    fn teardown_interrupt(&self) {
        self.state().interrupt_registered = false;
    }
}

/// A frame handed to the MAC layer.
#[derive(Clone, Debug)]
pub(crate) struct Delivery {
    pub node: Option<MACAddress>,
    pub frame: RxFrame,
    pub rssi: u8,
    pub noise_floor: i8,
}

/// A MAC layer, which records everything the core tells it.
#[derive(Default)]
pub(crate) struct FakeMac {
    nodes: Mutex<Vec<NodeRef>>,
    deliveries: Mutex<Vec<Delivery>>,
    mic_failures: Mutex<Vec<(Option<MACAddress>, u8)>>,
    completions: Mutex<Vec<(TxQueue, OutboundFrame, TxCompletion)>>,
    statuses: Mutex<Vec<(MACAddress, TxStatus)>>,
    rate_updates: Mutex<Vec<MACAddress>>,
}
impl FakeMac {
    pub fn add_node(&self, node: NodeRef) {
        self.nodes.lock().unwrap().push(node);
    }
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
    pub fn mic_failures(&self) -> Vec<(Option<MACAddress>, u8)> {
        self.mic_failures.lock().unwrap().clone()
    }
    pub fn completions(&self) -> Vec<(TxQueue, OutboundFrame, TxCompletion)> {
        self.completions.lock().unwrap().clone()
    }
    pub fn statuses(&self) -> Vec<(MACAddress, TxStatus)> {
        self.statuses.lock().unwrap().clone()
    }
    pub fn rate_updates(&self) -> Vec<MACAddress> {
        self.rate_updates.lock().unwrap().clone()
    }
}
impl MacLayer for FakeMac {
    fn deliver_frame(&self, target: RxTarget, frame: RxFrame, rssi: u8, noise_floor: i8) {
        let node = match target {
            RxTarget::Node(node) => Some(node.address()),
            RxTarget::Broadcast => None,
        };
        self.deliveries.lock().unwrap().push(Delivery {
            node,
            frame,
            rssi,
            noise_floor,
        });
    }
    fn notify_mic_failure(&self, node: Option<&NodeRef>, _mpdu: &[u8], key_index: u8) {
        self.mic_failures
            .lock()
            .unwrap()
            .push((node.map(|node| node.address()), key_index));
    }
    fn find_node(&self, address: &MACAddress) -> Option<NodeRef> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|node| node.address() == *address)
            .cloned()
    }
    fn tx_complete(
        &self,
        queue: TxQueue,
        frame: OutboundFrame,
        _node: NodeRef,
        completion: TxCompletion,
    ) {
        self.completions
            .lock()
            .unwrap()
            .push((queue, frame, completion));
    }
    fn rate_control_tx_status(&self, node: &NodeRef, status: TxStatus) {
        self.statuses
            .lock()
            .unwrap()
            .push((node.address(), status));
    }
    fn rate_control_update(&self, node: &NodeRef) {
        self.rate_updates.lock().unwrap().push(node.address());
    }
}

pub(crate) type TestDevice = Device<FakeBus, FakeMac>;

/// A device, which wasn't attached yet.
pub(crate) fn device() -> TestDevice {
    device_with(|_| {})
}
/// A device with modified calibration data.
pub(crate) fn device_with(f: impl FnOnce(&mut Calibration)) -> TestDevice {
    let mut calibration = Calibration::default();
    f(&mut calibration);
    Device::new(
        FakeBus::new(),
        FakeMac::default(),
        DeviceConfig::default(),
        calibration,
        FIRMWARE.to_vec(),
    )
}
pub(crate) fn attached_device() -> TestDevice {
    let device = device();
    device.attach().unwrap();
    device
}
pub(crate) fn running_device() -> TestDevice {
    let device = attached_device();
    device.init().unwrap();
    device
}

/// A node with the given association ID, that isn't known to any device.
pub(crate) fn node(aid: u16, ht: bool) -> NodeRef {
    node_with(
        [0x02, 0x00, 0x00, 0x10, (aid >> 8) as u8, aid as u8],
        aid,
        ht,
    )
}
/// A node with `address`, which isn't HT capable.
pub(crate) fn node_at(address: [u8; 6], aid: u16) -> NodeRef {
    node_with(address, aid, false)
}
fn node_with(address: [u8; 6], aid: u16, ht: bool) -> NodeRef {
    let ht_capabilities = HtCapabilities {
        ht,
        mpdu_density: if ht { 4 } else { 0 },
        ..Default::default()
    };
    Arc::new(Node::new(MACAddress::new(address), aid, ht_capabilities))
}
/// A legacy node, which is associated with `device`.
pub(crate) fn associated_node(device: &TestDevice, aid: u16) -> NodeRef {
    let node = node(aid, false);
    device.associate_node(node.clone()).unwrap();
    device.mac.add_node(node.clone());
    node
}
/// An HT node, which is associated with `device` and uses MCS 7.
pub(crate) fn ht_node(device: &TestDevice, aid: u16) -> NodeRef {
    let node = node(aid, true);
    node.set_current_rate(Rate::Ht(7));
    device.associate_node(node.clone()).unwrap();
    device.mac.add_node(node.clone());
    node
}

/// Let the hardware receive a data frame to [STA] containing `payload`.
pub(crate) fn hw_receive_data(device: &TestDevice, payload: &[u8]) {
    let mpdu = data(STA, payload);
    let rxwi = RxWi {
        len: mpdu.len() as u16,
        rssi: [40, 0, 0],
        ..Default::default()
    };
    device.bus.hw_receive(&rxwi, 0, &mpdu);
}

/// Run the deferred tasks, until none are left.
pub(crate) fn run_until_idle(device: &TestDevice) {
    for _ in 0..1000 {
        if device.tasks.is_empty() {
            return;
        }
        device.run_tasks();
    }
    panic!("Tasks didn't settle.");
}

