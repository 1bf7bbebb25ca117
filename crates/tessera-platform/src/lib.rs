// SPDX-License-Identifier: CEPL-1.0
//! Host surface glue: the windowing crate plus a flattened event stream the
//! app consumes.

pub use winit;

use tracing::trace;
use winit::event::{DeviceEvent, ElementState, MouseButton, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HostEvent {
    Key {
        code: KeyCode,
        pressed: bool,
        repeat: bool,
    },
    MouseButton {
        button: MouseButton,
        pressed: bool,
    },
    /// Raw pointer motion in device units, independent of cursor position.
    MouseMotion {
        dx: f64,
        dy: f64,
    },
    Resized {
        width: u32,
        height: u32,
    },
    /// The window became fully hidden or visible again.
    Occluded {
        occluded: bool,
    },
    CloseRequested,
}

pub fn from_window_event(event: &WindowEvent) -> Option<HostEvent> {
    let out = match event {
        WindowEvent::CloseRequested | WindowEvent::Destroyed => HostEvent::CloseRequested,
        WindowEvent::Resized(size) => HostEvent::Resized {
            width: size.width,
            height: size.height,
        },
        WindowEvent::Occluded(occluded) => HostEvent::Occluded {
            occluded: *occluded,
        },
        WindowEvent::KeyboardInput { event, .. } => match event.physical_key {
            PhysicalKey::Code(code) => HostEvent::Key {
                code,
                pressed: event.state == ElementState::Pressed,
                repeat: event.repeat,
            },
            PhysicalKey::Unidentified(_) => return None,
        },
        WindowEvent::MouseInput { state, button, .. } => HostEvent::MouseButton {
            button: *button,
            pressed: *state == ElementState::Pressed,
        },
        _ => return None,
    };
    trace!(?out, "host event");
    Some(out)
}

pub fn from_device_event(event: &DeviceEvent) -> Option<HostEvent> {
    match event {
        DeviceEvent::MouseMotion { delta: (dx, dy) } => {
            Some(HostEvent::MouseMotion { dx: *dx, dy: *dy })
        }
        _ => None,
    }
}
