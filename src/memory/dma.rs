//! DMA 버퍼
//!
//! 호스트 컨트롤러와 공유되는 메모리(링, 컨텍스트, 데이터 버퍼)를 할당합니다.
//! 하드웨어가 언제든 읽고 쓸 수 있으므로 모든 원소 접근은 volatile로 수행하며,
//! 정렬은 호출자가 명시합니다 (xHCI 링/컨텍스트는 64바이트 정렬).
//!
//! xHCI 자료구조는 4KiB 페이지 경계를 넘으면 안 되므로, 모든 할당은 크기를
//! 올림한 2의 거듭제곱(최대 4KiB)으로도 정렬되어 한 페이지 안에 놓입니다.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;
use volatile::Volatile;
use x86_64::PhysAddr;

use crate::drivers::usb::error::UsbError;
use crate::memory::paging::virt_to_phys;

/// 하나의 DMA 할당이 넘을 수 없는 경계
pub const PAGE_SIZE: usize = 4096;

/// 모든 비트가 0인 값이 유효한 POD 타입
///
/// # Safety
/// 구현 타입은 `Copy`이고, 0으로 채워진 메모리가 그 타입의 유효한 값이어야 합니다.
pub unsafe trait Zeroable: Copy {}

unsafe impl Zeroable for u8 {}
unsafe impl Zeroable for u16 {}
unsafe impl Zeroable for u32 {}
unsafe impl Zeroable for u64 {}

/// 하드웨어 공유 버퍼
pub struct DmaBuffer<T: Zeroable> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
    _marker: PhantomData<T>,
}

impl<T: Zeroable> DmaBuffer<T> {
    /// 0으로 초기화된 버퍼 할당
    ///
    /// `align`은 2의 거듭제곱이어야 하며, `T`의 정렬보다 작으면 `T`의 정렬을 사용합니다.
    /// [`PAGE_SIZE`]보다 큰 요청은 거부합니다.
    pub fn new_zeroed(len: usize, align: usize) -> Result<Self, UsbError> {
        if len == 0 || size_of::<T>() == 0 {
            return Err(UsbError::InvalidParameter);
        }
        let size = size_of::<T>()
            .checked_mul(len)
            .ok_or(UsbError::InvalidParameter)?;
        if size > PAGE_SIZE {
            return Err(UsbError::InvalidParameter);
        }
        let align = align
            .max(align_of::<T>())
            .max(size.next_power_of_two().min(PAGE_SIZE));
        let layout = Layout::from_size_align(size, align).map_err(|_| UsbError::InvalidParameter)?;

        // SAFETY: layout의 크기는 0이 아닙니다.
        let raw = unsafe { alloc_zeroed(layout) } as *mut T;
        let ptr = NonNull::new(raw).ok_or(UsbError::AllocationFailed)?;

        Ok(Self {
            ptr,
            len,
            layout,
            _marker: PhantomData,
        })
    }

    /// 원소 수
    pub fn len(&self) -> usize {
        self.len
    }

    /// 비어 있는지 (할당 규칙상 항상 false)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 원소 읽기 (volatile)
    pub fn read(&self, index: usize) -> T {
        assert!(index < self.len, "DMA buffer index out of range");
        // SAFETY: index는 할당 범위 안이며, 메모리는 0 초기화된 유효한 T입니다.
        unsafe { Volatile::new(&*self.ptr.as_ptr().add(index)).read() }
    }

    /// 원소 쓰기 (volatile)
    pub fn write(&mut self, index: usize, value: T) {
        assert!(index < self.len, "DMA buffer index out of range");
        // SAFETY: index는 할당 범위 안입니다.
        unsafe { Volatile::new(&mut *self.ptr.as_ptr().add(index)).write(value) }
    }

    /// 전체를 0으로 채우기
    pub fn clear(&mut self) {
        // SAFETY: 할당된 전체 범위에 대한 쓰기이며, 0은 유효한 T입니다.
        unsafe { core::ptr::write_bytes(self.ptr.as_ptr() as *mut u8, 0, self.layout.size()) }
    }

    /// 원소의 가변 참조
    ///
    /// 하드웨어가 아직 읽지 않는 구간(명령 발행 전의 입력 컨텍스트 등)에만 사용합니다.
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        assert!(index < self.len, "DMA buffer index out of range");
        // SAFETY: index는 할당 범위 안이며, &mut self가 배타적 접근을 보장합니다.
        unsafe { &mut *self.ptr.as_ptr().add(index) }
    }

    /// 원소의 원시 포인터
    ///
    /// 하드웨어 레이아웃의 일부 필드만 volatile로 갱신해야 할 때 사용합니다.
    pub fn as_mut_ptr(&mut self, index: usize) -> *mut T {
        assert!(index < self.len, "DMA buffer index out of range");
        // SAFETY: index는 할당 범위 안입니다.
        unsafe { self.ptr.as_ptr().add(index) }
    }

    /// 버퍼 시작 물리 주소
    pub fn phys_addr(&self) -> PhysAddr {
        virt_to_phys(self.ptr.as_ptr() as u64)
    }

    /// 원소의 물리 주소
    pub fn phys_addr_of(&self, index: usize) -> PhysAddr {
        assert!(index < self.len, "DMA buffer index out of range");
        self.phys_addr() + (index * size_of::<T>()) as u64
    }

    /// 물리 주소가 가리키는 원소 인덱스
    ///
    /// 원소 경계에 정렬되지 않았거나 범위 밖이면 `None`입니다.
    pub fn index_of(&self, phys: u64) -> Option<usize> {
        let base = self.phys_addr().as_u64();
        let offset = phys.checked_sub(base)? as usize;
        if offset % size_of::<T>() != 0 {
            return None;
        }
        let index = offset / size_of::<T>();
        (index < self.len).then_some(index)
    }
}

impl DmaBuffer<u8> {
    /// 바이트 버퍼 내용을 복사해 읽기
    pub fn copy_to(&self, out: &mut [u8]) {
        let n = out.len().min(self.len);
        for (i, byte) in out.iter_mut().take(n).enumerate() {
            *byte = self.read(i);
        }
    }
}

impl<T: Zeroable> Drop for DmaBuffer<T> {
    fn drop(&mut self) {
        // SAFETY: ptr과 layout은 new_zeroed에서 할당한 그대로입니다.
        unsafe { dealloc(self.ptr.as_ptr() as *mut u8, self.layout) }
    }
}

// 링과 컨텍스트는 한 번에 하나의 소유자만 접근합니다.
unsafe impl<T: Zeroable + Send> Send for DmaBuffer<T> {}
