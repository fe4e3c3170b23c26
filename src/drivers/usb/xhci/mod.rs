//! xHCI (eXtensible Host Controller Interface)
//!
//! 컨트롤러와 공유하는 메모리 구조(TRB, 링, 컨텍스트)와 MMIO 레지스터 접근.
//!
//! # 참고 자료
//! - xHCI Specification Revision 1.2

pub mod context;
pub mod regs;
pub mod ring;
pub mod slot;
pub mod trb;

#[cfg(test)]
pub(crate) mod sim;
#[cfg(test)]
mod tests;

pub use context::{DeviceContext, EndpointContext, ErstEntry, InputContext, SlotContext};
pub use regs::XhciRegisters;
pub use ring::{CommandRing, EventRing, HardwareCursor, ProducerRing, TransferRing};
pub use slot::{DeviceSlot, SlotHandle, SlotManager};
pub use trb::{CompletionCode, Event, Trb, TrbType};
