//! 부트로더 정보 구조체
//!
//! 부트로더가 전달한 `BootInfo`에서 커널이 쓰는 값만 골라 보관합니다.
//! 프레임버퍼와 메모리 맵은 해석하지 않고 콘솔/메모리 관리자에 넘길 값으로만 둡니다.

use bootloader_api::info::{FrameBuffer, PixelFormat};
use bootloader_api::BootInfo;
use spin::Once;

/// 픽셀 포맷 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormatTag {
    Rgb,
    Bgr,
    /// 8비트 그레이스케일
    Gray,
    Unknown,
}

impl From<PixelFormat> for PixelFormatTag {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Rgb => PixelFormatTag::Rgb,
            PixelFormat::Bgr => PixelFormatTag::Bgr,
            PixelFormat::U8 => PixelFormatTag::Gray,
            _ => PixelFormatTag::Unknown,
        }
    }
}

/// 프레임버퍼 기술자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferDescriptor {
    /// 프레임버퍼 시작 (가상 주소)
    pub base: u64,
    pub byte_len: usize,
    pub width: usize,
    pub height: usize,
    /// 한 줄의 픽셀 수 (width 이상)
    pub stride: usize,
    pub bytes_per_pixel: usize,
    pub pixel_format: PixelFormatTag,
}

impl FrameBufferDescriptor {
    pub fn from_framebuffer(framebuffer: &FrameBuffer) -> Self {
        let info = framebuffer.info();
        Self {
            base: framebuffer.buffer().as_ptr() as u64,
            byte_len: info.byte_len,
            width: info.width,
            height: info.height,
            stride: info.stride,
            bytes_per_pixel: info.bytes_per_pixel,
            pixel_format: info.pixel_format.into(),
        }
    }

    /// 한 줄의 바이트 수
    pub fn bytes_per_scan_line(&self) -> usize {
        self.stride * self.bytes_per_pixel
    }
}

/// 커널이 부트로더에게서 받은 값
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootHandoff {
    pub framebuffer: Option<FrameBufferDescriptor>,
    pub memory_region_count: usize,
    pub physical_memory_offset: Option<u64>,
    pub rsdp_addr: Option<u64>,
}

impl BootHandoff {
    pub fn from_boot_info(boot_info: &BootInfo) -> Self {
        Self {
            framebuffer: boot_info
                .framebuffer
                .as_ref()
                .map(FrameBufferDescriptor::from_framebuffer),
            memory_region_count: boot_info.memory_regions.len(),
            physical_memory_offset: boot_info.physical_memory_offset.as_ref().copied(),
            rsdp_addr: boot_info.rsdp_addr.as_ref().copied(),
        }
    }
}

static HANDOFF: Once<BootHandoff> = Once::new();

/// 부트 정보 초기화
///
/// 두 번째 호출부터는 처음 저장한 값을 그대로 돌려줍니다.
pub fn init(boot_info: &'static BootInfo) -> &'static BootHandoff {
    HANDOFF.call_once(|| BootHandoff::from_boot_info(boot_info))
}

/// 저장된 부트 정보 (`init` 전에는 `None`)
pub fn get() -> Option<&'static BootHandoff> {
    HANDOFF.get()
}

/// 물리 메모리 매핑 오프셋
pub fn physical_memory_offset() -> Option<u64> {
    get().and_then(|handoff| handoff.physical_memory_offset)
}

/// 메모리 맵 엔트리 수
pub fn memory_map_len() -> usize {
    get().map_or(0, |handoff| handoff.memory_region_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_formats_map_to_tags() {
        assert_eq!(PixelFormatTag::from(PixelFormat::Rgb), PixelFormatTag::Rgb);
        assert_eq!(PixelFormatTag::from(PixelFormat::Bgr), PixelFormatTag::Bgr);
        assert_eq!(PixelFormatTag::from(PixelFormat::U8), PixelFormatTag::Gray);
        assert_eq!(
            PixelFormatTag::from(PixelFormat::Unknown {
                red_position: 0,
                green_position: 8,
                blue_position: 16,
            }),
            PixelFormatTag::Unknown
        );
    }

    #[test]
    fn scan_line_uses_stride() {
        let framebuffer = FrameBufferDescriptor {
            base: 0xFD00_0000,
            byte_len: 1280 * 800 * 4,
            width: 1270,
            height: 800,
            stride: 1280,
            bytes_per_pixel: 4,
            pixel_format: PixelFormatTag::Bgr,
        };
        assert_eq!(framebuffer.bytes_per_scan_line(), 5120);
        assert!(BootHandoff::default().framebuffer.is_none());
    }
}
