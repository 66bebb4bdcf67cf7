//! `pilab list` command: show the experiments and the board configuration.

use std::fmt::Write;

use pilab_core::catalog::Catalog;

use crate::config::PilabConfig;

pub fn run_list(config: &PilabConfig) {
    print!("{}", render_list(config));
}

pub fn render_list(config: &PilabConfig) -> String {
    let catalog = Catalog::standard(&config.root);
    let launcher = config.launcher();
    let mut out = String::new();

    let _ = writeln!(out, "Experiments ({}):", config.root.display());
    for entry in catalog.entries() {
        let present = if entry.program.is_file() { "" } else { "  [missing]" };
        let _ = writeln!(out, "  {}  {}{present}", entry.id, entry.name);
        let _ = writeln!(out, "     {}", entry.description);
        let hardware: Vec<String> = entry.hardware.iter().map(|r| r.to_string()).collect();
        let _ = writeln!(out, "     uses: {}", hardware.join(", "));
    }

    let (program, args) = launcher.command_line(std::path::Path::new("exN.py"));
    let mut command = vec![program.to_string_lossy().into_owned()];
    command.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    let _ = writeln!(out);
    let _ = writeln!(out, "Launch: {}", command.join(" "));

    let _ = writeln!(out);
    let Some(ref hw) = config.hardware else {
        let _ = writeln!(out, "Hardware: disabled");
        return out;
    };

    let _ = writeln!(out, "Pins (BCM):");
    for (name, pin) in hw.pins.entries() {
        let _ = writeln!(out, "  {name:<14} {pin}");
    }
    let _ = writeln!(
        out,
        "LED strip: {} px, {} Hz, DMA {}, brightness {}",
        hw.led.count, hw.led.freq_hz, hw.led.dma, hw.led.brightness
    );
    let helper = if hw.led_helper.is_empty() {
        "none".to_string()
    } else {
        hw.led_helper.join(" ")
    };
    let _ = writeln!(out, "LED helper: {helper}");
    let _ = writeln!(
        out,
        "OLED: {}x{} at {:#04x} on {}",
        hw.oled.width,
        hw.oled.height,
        hw.oled.address,
        hw.oled.i2c_bus.display()
    );
    let _ = writeln!(
        out,
        "Button: GPIO {}, hold {}s to shut down",
        config.button.pin,
        config.button.hold.as_secs()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, Overrides};

    fn resolve(root: &std::path::Path, no_hardware: bool) -> PilabConfig {
        let flags = Overrides {
            root: Some(root.to_path_buf()),
            no_sudo: true,
            no_hardware,
        };
        PilabConfig::resolve_with(ConfigFile::default(), &flags).unwrap()
    }

    #[test]
    fn lists_catalog_and_board() {
        let _lock = crate::test_util::lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("ex1.py"), "").unwrap();

        let text = render_list(&resolve(tmp.path(), false));
        assert!(text.contains("  1  LED Color Lottery System\n"), "{text}");
        assert!(text.contains("  2  OLED Calculator with LED Strip  [missing]"), "{text}");
        assert!(text.contains("uses: led strip, buttons"), "{text}");
        assert!(text.contains("Launch: python3 exN.py"), "{text}");
        assert!(text.contains("  button_toggle  16"), "{text}");
        assert!(text.contains("OLED: 128x64 at 0x3c on /dev/i2c-1"), "{text}");
        assert!(text.contains("Button: GPIO 16, hold 5s"), "{text}");
    }

    #[test]
    fn disabled_hardware_is_reported() {
        let _lock = crate::test_util::lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let text = render_list(&resolve(tmp.path(), true));
        assert!(text.ends_with("Hardware: disabled\n"), "{text}");
        assert!(!text.contains("Pins"));
    }
}
