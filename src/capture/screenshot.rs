//! Live capture of the game window using the Windows Graphics Capture API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::{ImageBuffer, Rgba, RgbaImage};
use tracing::{debug, info};

use windows::core::Interface;
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{Direct3D11CaptureFramePool, GraphicsCaptureItem};
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAP_READ, D3D11_SDK_VERSION,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::System::WinRT::Direct3D11::CreateDirect3D11DeviceFromDXGIDevice;
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;

use super::window::{find_game_window, get_client_area_info};
use super::{normalize_frame, CaptureError, FrameSource};
use crate::config::ScanSettings;

/// Frame source backed by the running game window.
///
/// Never sends input to the game: `advance` waits for the player to turn the
/// page and returns once the captured content has changed and settled.
pub struct WindowCapture {
    hwnd: HWND,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    page_wait: Duration,
    poll_interval: Duration,
    last: Option<RgbaImage>,
}

impl WindowCapture {
    pub fn attach(titles: &[String], settings: &ScanSettings) -> Result<Self, CaptureError> {
        // Already-initialized apartments are fine
        let _ = unsafe {
            windows::Win32::System::WinRT::RoInitialize(
                windows::Win32::System::WinRT::RO_INIT_MULTITHREADED,
            )
        };

        let (hwnd, title) = find_game_window(titles).ok_or_else(|| CaptureError::WindowNotFound {
            titles: titles.to_vec(),
        })?;
        info!("Found game window \"{}\" ({:?})", title, hwnd);

        let (device, context) = create_d3d11_device().map_err(backend)?;

        Ok(Self {
            hwnd,
            device,
            context,
            page_wait: Duration::from_millis(settings.page_wait_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            last: None,
        })
    }

    fn capture_normalized(&self) -> Result<RgbaImage, CaptureError> {
        let raw = capture_client_area(self.hwnd, &self.device, &self.context).map_err(backend)?;
        normalize_frame(raw)
    }
}

impl FrameSource for WindowCapture {
    fn grab(&mut self) -> Result<RgbaImage, CaptureError> {
        let frame = self.capture_normalized()?;
        self.last = Some(frame.clone());
        Ok(frame)
    }

    fn advance(&mut self) -> Result<(), CaptureError> {
        let Some(before) = self.last.clone() else {
            return Ok(());
        };

        info!("Turn to the next page in the game...");
        let start = Instant::now();
        let mut previous = before.clone();
        let mut changed = false;

        while start.elapsed() < self.page_wait {
            std::thread::sleep(self.poll_interval);
            let current = self.capture_normalized()?;
            if !changed {
                changed = current.as_raw() != before.as_raw();
            } else if current.as_raw() == previous.as_raw() {
                // Content changed and is stable across two polls
                debug!("Page change settled after {:?}", start.elapsed());
                return Ok(());
            }
            previous = current;
        }

        debug!("No settled page change within {:?}", self.page_wait);
        Ok(())
    }
}

fn backend(e: anyhow::Error) -> CaptureError {
    CaptureError::Backend(format!("{:#}", e))
}

/// Captures the client area of `hwnd` (title bar and borders cropped off).
///
/// Steps: create a capture item for the window, grab one frame into a
/// staging texture, copy it to CPU memory converting BGRA to RGBA.
fn capture_client_area(
    hwnd: HWND,
    device: &ID3D11Device,
    context: &ID3D11DeviceContext,
) -> Result<RgbaImage> {
    let (client_rect, client_offset) = get_client_area_info(hwnd)?;
    let client_width = (client_rect.right - client_rect.left) as u32;
    let client_height = (client_rect.bottom - client_rect.top) as u32;
    if client_width == 0 || client_height == 0 {
        return Err(anyhow!("Game window is minimized"));
    }

    let item = create_capture_item(hwnd)?;
    let size = item.Size()?;

    let d3d_device = create_direct3d_device(device)?;
    let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
        &d3d_device,
        DirectXPixelFormat::B8G8R8A8UIntNormalized,
        1,
        size,
    )?;
    let session = frame_pool.CreateCaptureSession(&item)?;

    let frame_arrived = Arc::new(AtomicBool::new(false));
    let frame_arrived_clone = frame_arrived.clone();
    frame_pool.FrameArrived(&TypedEventHandler::new(
        move |_pool: &Option<Direct3D11CaptureFramePool>, _| {
            frame_arrived_clone.store(true, Ordering::SeqCst);
            Ok(())
        },
    ))?;

    session.StartCapture()?;

    let start = Instant::now();
    while !frame_arrived.load(Ordering::SeqCst) {
        if start.elapsed().as_secs() > 5 {
            return Err(anyhow!("Timeout waiting for frame"));
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let frame = frame_pool.TryGetNextFrame()?;
    let surface = frame.Surface()?;
    let access: windows::Win32::System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess =
        surface.cast()?;
    let texture: ID3D11Texture2D = unsafe { access.GetInterface()? };

    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };

    let staging_desc = D3D11_TEXTURE2D_DESC {
        Width: desc.Width,
        Height: desc.Height,
        MipLevels: 1,
        ArraySize: 1,
        Format: desc.Format,
        SampleDesc: desc.SampleDesc,
        Usage: D3D11_USAGE_STAGING,
        BindFlags: Default::default(),
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: Default::default(),
    };

    let staging_texture = unsafe {
        let mut staging: Option<ID3D11Texture2D> = None;
        device.CreateTexture2D(&staging_desc, None, Some(&mut staging))?;
        staging.ok_or_else(|| anyhow!("Failed to create staging texture"))?
    };

    unsafe {
        context.CopyResource(
            &staging_texture.cast::<ID3D11Resource>()?,
            &texture.cast::<ID3D11Resource>()?,
        );
    }

    let mapped = unsafe {
        let mut mapped = Default::default();
        context.Map(
            &staging_texture.cast::<ID3D11Resource>()?,
            0,
            D3D11_MAP_READ,
            0,
            Some(&mut mapped),
        )?;
        mapped
    };

    let crop_x = client_offset.x.max(0) as u32;
    let crop_y = client_offset.y.max(0) as u32;
    if crop_x + client_width > desc.Width || crop_y + client_height > desc.Height {
        unsafe { context.Unmap(&staging_texture.cast::<ID3D11Resource>()?, 0) };
        return Err(anyhow!(
            "Client area {}x{}+{}+{} outside captured {}x{} window",
            client_width,
            client_height,
            crop_x,
            crop_y,
            desc.Width,
            desc.Height
        ));
    }

    let src_data = unsafe {
        std::slice::from_raw_parts(
            mapped.pData as *const u8,
            (mapped.RowPitch * desc.Height) as usize,
        )
    };
    let row_pitch = mapped.RowPitch as usize;

    let img: ImageBuffer<Rgba<u8>, Vec<u8>> =
        ImageBuffer::from_fn(client_width, client_height, |x, y| {
            let offset = (crop_y + y) as usize * row_pitch + (crop_x + x) as usize * 4;
            // BGRA -> RGBA
            Rgba([
                src_data[offset + 2],
                src_data[offset + 1],
                src_data[offset],
                src_data[offset + 3],
            ])
        });

    unsafe {
        context.Unmap(&staging_texture.cast::<ID3D11Resource>()?, 0);
    }
    session.Close()?;
    frame_pool.Close()?;

    Ok(img)
}

/// Creates a Direct3D 11 device and immediate context.
fn create_d3d11_device() -> Result<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;

    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            None,
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )?;
    }

    Ok((
        device.ok_or_else(|| anyhow!("Failed to create D3D11 device"))?,
        context.ok_or_else(|| anyhow!("Failed to create D3D11 context"))?,
    ))
}

/// Wraps a D3D11 device for the Windows Graphics Capture API.
fn create_direct3d_device(
    device: &ID3D11Device,
) -> Result<windows::Graphics::DirectX::Direct3D11::IDirect3DDevice> {
    let dxgi_device: windows::Win32::Graphics::Dxgi::IDXGIDevice = device.cast()?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)? };
    inspectable
        .cast()
        .context("Failed to cast to IDirect3DDevice")
}

fn create_capture_item(hwnd: HWND) -> Result<GraphicsCaptureItem> {
    let class_name = windows::core::h!("Windows.Graphics.Capture.GraphicsCaptureItem");
    let interop: IGraphicsCaptureItemInterop = unsafe {
        windows::Win32::System::WinRT::RoGetActivationFactory(class_name)
            .context("Failed to get IGraphicsCaptureItemInterop")?
    };
    unsafe {
        interop
            .CreateForWindow(hwnd)
            .context("Failed to create capture item for window")
    }
}
