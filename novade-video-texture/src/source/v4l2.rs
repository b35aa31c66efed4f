//! V4L2 memory-mapped streaming capture.
//!
//! Only the handful of ioctls needed for single-planar mmap capture are bound.
//! Struct layouts follow `linux/videodev2.h`.

use memmap2::{Mmap, MmapOptions};
use nix::errno::Errno;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::capture::{CaptureDevice, DequeuedBuffer};
use super::{FrameFormat, PixelFormat};
use crate::config::CaptureConfig;
use crate::error::{RendererError, Result};

#[allow(non_camel_case_types)]
mod ffi {
    use std::os::raw::{c_int, c_ulong};

    pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
    pub const V4L2_MEMORY_MMAP: u32 = 1;
    pub const V4L2_FIELD_ANY: u32 = 0;
    pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
    pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;
    pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;
    pub const V4L2_CAP_TIMEPERFRAME: u32 = 0x1000;

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct v4l2_capability {
        pub driver: [u8; 16],
        pub card: [u8; 32],
        pub bus_info: [u8; 32],
        pub version: u32,
        pub capabilities: u32,
        pub device_caps: u32,
        pub reserved: [u32; 3],
    }

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct v4l2_pix_format {
        pub width: u32,
        pub height: u32,
        pub pixelformat: u32,
        pub field: u32,
        pub bytesperline: u32,
        pub sizeimage: u32,
        pub colorspace: u32,
        pub priv_: u32,
        pub flags: u32,
        pub ycbcr_enc: u32,
        pub quantization: u32,
        pub xfer_func: u32,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub union v4l2_format_fmt {
        pub pix: v4l2_pix_format,
        pub raw_data: [u8; 200],
        // The kernel union holds pointers, which gives it 8-byte alignment.
        _align: [u64; 25],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct v4l2_format {
        pub type_: u32,
        pub fmt: v4l2_format_fmt,
    }

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct v4l2_requestbuffers {
        pub count: u32,
        pub type_: u32,
        pub memory: u32,
        pub capabilities: u32,
        pub flags: u8,
        pub reserved: [u8; 3],
    }

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct v4l2_timecode {
        pub type_: u32,
        pub flags: u32,
        pub frames: u8,
        pub seconds: u8,
        pub minutes: u8,
        pub hours: u8,
        pub userbits: [u8; 4],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub union v4l2_buffer_m {
        pub offset: u32,
        pub userptr: c_ulong,
        pub fd: i32,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct v4l2_buffer {
        pub index: u32,
        pub type_: u32,
        pub bytesused: u32,
        pub flags: u32,
        pub field: u32,
        pub timestamp: libc::timeval,
        pub timecode: v4l2_timecode,
        pub sequence: u32,
        pub memory: u32,
        pub m: v4l2_buffer_m,
        pub length: u32,
        pub reserved2: u32,
        pub request_fd: i32,
    }

    impl v4l2_buffer {
        pub fn mmap_capture(index: u32) -> Self {
            Self {
                index,
                type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
                bytesused: 0,
                flags: 0,
                field: 0,
                timestamp: libc::timeval { tv_sec: 0, tv_usec: 0 },
                timecode: v4l2_timecode::default(),
                sequence: 0,
                memory: V4L2_MEMORY_MMAP,
                m: v4l2_buffer_m { userptr: 0 },
                length: 0,
                reserved2: 0,
                request_fd: 0,
            }
        }
    }

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct v4l2_fract {
        pub numerator: u32,
        pub denominator: u32,
    }

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct v4l2_captureparm {
        pub capability: u32,
        pub capturemode: u32,
        pub timeperframe: v4l2_fract,
        pub extendedmode: u32,
        pub readbuffers: u32,
        pub reserved: [u32; 4],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub union v4l2_streamparm_parm {
        pub capture: v4l2_captureparm,
        pub raw_data: [u8; 200],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct v4l2_streamparm {
        pub type_: u32,
        pub parm: v4l2_streamparm_parm,
    }

    nix::ioctl_read!(vidioc_querycap, b'V', 0, v4l2_capability);
    nix::ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
    nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
    nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
    nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
    nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
    nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, c_int);
    nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, c_int);
    nix::ioctl_readwrite!(vidioc_s_parm, b'V', 22, v4l2_streamparm);
}

/// Returns the name of the first capability the device lacks, if any.
fn missing_capability(cap: &ffi::v4l2_capability) -> Option<&'static str> {
    let caps = if cap.capabilities & ffi::V4L2_CAP_DEVICE_CAPS != 0 {
        cap.device_caps
    } else {
        cap.capabilities
    };
    if caps & ffi::V4L2_CAP_VIDEO_CAPTURE == 0 {
        Some("video capture")
    } else if caps & ffi::V4L2_CAP_STREAMING == 0 {
        Some("streaming I/O")
    } else {
        None
    }
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// An open V4L2 device streaming into mmap'd buffers.
///
/// All buffers are queued on open. Dropping the device stops streaming and
/// unmaps the buffers.
pub struct V4l2Device {
    path: PathBuf,
    format: FrameFormat,
    buffers: Vec<Mmap>,
    streaming: bool,
    // Declared last so the mappings are released before the descriptor closes.
    file: File,
}

impl V4l2Device {
    /// Opens and configures the device described by `config`, then starts streaming.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let path = config.device.clone();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_error("open", &path, e))?;
        let fd = file.as_raw_fd();

        let mut cap = ffi::v4l2_capability::default();
        unsafe { ffi::vidioc_querycap(fd, &mut cap) }.map_err(|e| capture_error("VIDIOC_QUERYCAP", &path, e))?;
        if let Some(missing) = missing_capability(&cap) {
            return Err(RendererError::CaptureCapability {
                device: path,
                missing: missing.to_string(),
            });
        }
        info!(
            "Opened capture device {:?}: driver '{}', card '{}'",
            path,
            c_string(&cap.driver),
            c_string(&cap.card)
        );

        let format = Self::set_format(fd, &path, config)?;
        Self::set_frame_rate(fd, &path, config.frame_rate);

        let mut request = ffi::v4l2_requestbuffers {
            count: config.buffer_count,
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: ffi::V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        unsafe { ffi::vidioc_reqbufs(fd, &mut request) }.map_err(|e| capture_error("VIDIOC_REQBUFS", &path, e))?;
        if request.count < 2 {
            return Err(RendererError::CaptureCapability {
                device: path,
                missing: format!("at least 2 capture buffers (driver granted {})", request.count),
            });
        }
        if request.count != config.buffer_count {
            debug!("Requested {} buffers, driver granted {}", config.buffer_count, request.count);
        }

        let mut buffers = Vec::with_capacity(request.count as usize);
        for index in 0..request.count {
            let mut buf = ffi::v4l2_buffer::mmap_capture(index);
            unsafe { ffi::vidioc_querybuf(fd, &mut buf) }
                .map_err(|e| capture_error("VIDIOC_QUERYBUF", &path, e))?;
            let offset = unsafe { buf.m.offset };
            let mapping = unsafe {
                MmapOptions::new()
                    .offset(offset as u64)
                    .len(buf.length as usize)
                    .map(&file)
            }
            .map_err(|e| io_error("mmap", &path, e))?;
            buffers.push(mapping);
        }

        let mut device = Self {
            path,
            format,
            buffers,
            streaming: false,
            file,
        };
        for index in 0..device.buffers.len() {
            device.enqueue(index)?;
        }
        let buf_type = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE as i32;
        unsafe { ffi::vidioc_streamon(fd, &buf_type) }
            .map_err(|e| capture_error("VIDIOC_STREAMON", &device.path, e))?;
        device.streaming = true;

        info!(
            "Streaming {}x{} {:?} with {} buffers",
            format.width,
            format.height,
            format.pixel_format,
            device.buffers.len()
        );
        Ok(device)
    }

    fn set_format(fd: i32, path: &Path, config: &CaptureConfig) -> Result<FrameFormat> {
        let requested = config.pixel_format;
        let mut fmt = ffi::v4l2_format {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            fmt: ffi::v4l2_format_fmt { raw_data: [0; 200] },
        };
        fmt.fmt.pix = ffi::v4l2_pix_format {
            width: config.width,
            height: config.height,
            pixelformat: requested.fourcc(),
            field: ffi::V4L2_FIELD_ANY,
            ..Default::default()
        };
        unsafe { ffi::vidioc_s_fmt(fd, &mut fmt) }.map_err(|e| capture_error("VIDIOC_S_FMT", path, e))?;

        let pix = unsafe { fmt.fmt.pix };
        if pix.pixelformat != requested.fourcc() {
            return Err(RendererError::CaptureCapability {
                device: path.to_path_buf(),
                missing: format!("pixel format {:?}", requested),
            });
        }
        let format = FrameFormat {
            width: pix.width,
            height: pix.height,
            pixel_format: requested,
        };
        if (pix.width, pix.height) != (config.width, config.height) {
            warn!(
                "Capture device adjusted {}x{} to {}x{}",
                config.width, config.height, pix.width, pix.height
            );
        }
        let packed_stride = pix.width as usize * requested.bytes_per_pixel();
        if pix.bytesperline as usize != packed_stride {
            return Err(RendererError::CaptureCapability {
                device: path.to_path_buf(),
                missing: format!("tightly packed rows (stride {} for width {})", pix.bytesperline, pix.width),
            });
        }
        Ok(format)
    }

    fn set_frame_rate(fd: i32, path: &Path, frame_rate: u32) {
        let mut parm = ffi::v4l2_streamparm {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            parm: ffi::v4l2_streamparm_parm { raw_data: [0; 200] },
        };
        parm.parm.capture = ffi::v4l2_captureparm {
            timeperframe: ffi::v4l2_fract {
                numerator: 1,
                denominator: frame_rate,
            },
            ..Default::default()
        };
        match unsafe { ffi::vidioc_s_parm(fd, &mut parm) } {
            Ok(_) => {
                let granted = unsafe { parm.parm.capture };
                if granted.capability & ffi::V4L2_CAP_TIMEPERFRAME == 0 {
                    warn!("{:?} does not support setting the frame rate", path);
                } else {
                    debug!(
                        "Frame interval set to {}/{}",
                        granted.timeperframe.numerator, granted.timeperframe.denominator
                    );
                }
            }
            Err(e) => warn!("{:?}: VIDIOC_S_PARM failed, keeping the driver's frame rate: {}", path, e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn capture_error(operation: &'static str, path: &Path, source: Errno) -> RendererError {
    RendererError::Capture {
        operation,
        device: path.to_path_buf(),
        source,
    }
}

fn io_error(operation: &'static str, path: &Path, e: std::io::Error) -> RendererError {
    match e.raw_os_error() {
        Some(code) => capture_error(operation, path, Errno::from_i32(code)),
        None => RendererError::Io(e),
    }
}

impl CaptureDevice for V4l2Device {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn dequeue(&mut self) -> Result<DequeuedBuffer> {
        let fd = self.file.as_raw_fd();
        let mut buf = ffi::v4l2_buffer::mmap_capture(0);
        loop {
            match unsafe { ffi::vidioc_dqbuf(fd, &mut buf) } {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(capture_error("VIDIOC_DQBUF", &self.path, e)),
            }
        }
        Ok(DequeuedBuffer {
            index: buf.index as usize,
            bytes_used: buf.bytesused as usize,
            sequence: u64::from(buf.sequence),
        })
    }

    fn enqueue(&mut self, index: usize) -> Result<()> {
        let mut buf = ffi::v4l2_buffer::mmap_capture(index as u32);
        unsafe { ffi::vidioc_qbuf(self.file.as_raw_fd(), &mut buf) }
            .map_err(|e| capture_error("VIDIOC_QBUF", &self.path, e))?;
        Ok(())
    }

    fn buffer(&self, index: usize) -> &[u8] {
        &self.buffers[index]
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        if self.streaming {
            let buf_type = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE as i32;
            if let Err(e) = unsafe { ffi::vidioc_streamoff(self.file.as_raw_fd(), &buf_type) } {
                warn!("{:?}: VIDIOC_STREAMOFF failed: {}", self.path, e);
            }
        }
        self.buffers.clear();
        debug!("Closed capture device {:?}", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn struct_layouts_match_the_kernel_abi() {
        assert_eq!(size_of::<ffi::v4l2_capability>(), 104);
        assert_eq!(size_of::<ffi::v4l2_format>(), 208);
        assert_eq!(size_of::<ffi::v4l2_requestbuffers>(), 20);
        assert_eq!(size_of::<ffi::v4l2_buffer>(), 88);
        assert_eq!(size_of::<ffi::v4l2_streamparm>(), 204);
    }

    #[test]
    fn capability_checks_prefer_device_caps() {
        let mut cap = ffi::v4l2_capability {
            capabilities: ffi::V4L2_CAP_VIDEO_CAPTURE | ffi::V4L2_CAP_STREAMING,
            ..Default::default()
        };
        assert_eq!(missing_capability(&cap), None);

        cap.capabilities |= ffi::V4L2_CAP_DEVICE_CAPS;
        cap.device_caps = ffi::V4L2_CAP_VIDEO_CAPTURE;
        assert_eq!(missing_capability(&cap), Some("streaming I/O"));

        cap.device_caps = ffi::V4L2_CAP_STREAMING;
        assert_eq!(missing_capability(&cap), Some("video capture"));
    }

    #[test]
    fn driver_strings_stop_at_nul() {
        let mut driver = [0u8; 16];
        driver[..6].copy_from_slice(b"uvcvid");
        assert_eq!(c_string(&driver), "uvcvid");
        assert_eq!(c_string(b"full"), "full");
    }

    #[test]
    fn missing_device_names_path_and_operation() {
        let config = CaptureConfig {
            device: PathBuf::from("/dev/this-camera-does-not-exist"),
            ..Default::default()
        };
        let err = V4l2Device::open(&config).err().expect("open should fail");
        assert!(matches!(
            err,
            RendererError::Capture {
                operation: "open",
                source: Errno::ENOENT,
                ..
            }
        ));
        assert!(err.to_string().contains("this-camera-does-not-exist"));
    }
}
