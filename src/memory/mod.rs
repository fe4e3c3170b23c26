//! 메모리 관리 모듈
//!
//! 이 모듈은 xHCI 드라이버가 필요로 하는 메모리 서비스를 담당합니다:
//! 가상→물리 주소 변환, DMA 버퍼, 커널 힙.
//! 일반 페이지 할당은 이 커널 코어의 범위 밖입니다.

pub mod dma;
pub mod heap;
pub mod paging;

pub use dma::{DmaBuffer, Zeroable};
pub use paging::{physical_memory_offset, set_physical_memory_offset, virt_to_phys};

use x86_64::VirtAddr;

/// 메모리 관리 시스템 초기화
///
/// 부트로더가 매핑한 물리 메모리 오프셋을 기록해 DMA 주소 변환에 사용합니다.
/// 베어메탈 환경에서는 커널 힙도 함께 초기화합니다.
///
/// # Safety
/// - `physical_memory_offset`는 부트로더가 설정한 물리 메모리 오프셋이어야 합니다
/// - 이 함수는 한 번만 호출되어야 합니다
pub unsafe fn init(physical_memory_offset: Option<u64>) {
    if let Some(offset) = physical_memory_offset {
        paging::set_physical_memory_offset(VirtAddr::new(offset));
        crate::log_info!("Physical memory mapped at {:#x}", offset);
    } else {
        crate::log_warn!("No physical memory mapping; DMA addresses assume identity mapping");
    }

    heap::init_heap();
    let (start, size) = heap::heap_bounds();
    crate::log_info!("Heap allocator initialized at {:#x} ({} KiB)", start, size / 1024);
}
