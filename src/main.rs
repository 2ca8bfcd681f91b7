use std::cell::RefCell;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::{Args, CommandFactory, Parser, Subcommand};
#[allow(unused_imports)]
use log::{debug, info, warn, error};

use detlens::archive::ImageSource;
use detlens::batch::{summary_lines, BatchItem, BatchResult, Pagination};
use detlens::build_info::BuildInfo;
use detlens::config::{Config, CONFIG};
use detlens::detection::{DetectionResult, Payload};
use detlens::events::{EventBus, LayoutEvent};
use detlens::geometry::SurfaceSize;
use detlens::logging;
use detlens::overlay::{OverlayRenderer, RenderMode};
use detlens::raster::{LabelFont, RasterSink, RasterSurface};
use detlens::settings::UserSettings;
use detlens::style::ClassStyle;
use detlens::surface::SurfaceHandle;

const APP_NAME: &str = "detlens";
const DEFAULT_LABEL_SIZE: f32 = 14.0;

type Renderer = Rc<RefCell<OverlayRenderer<RasterSink>>>;

#[derive(Parser, Debug)]
#[command(name = "detlens", version, about)]
struct Cli {
    /// Settings file to use instead of the per-user one
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<String>,
    /// Write the buffered log to the log directory before exiting
    #[arg(long, global = true)]
    export_logs: bool,
    /// TrueType/OpenType font for "<class> <pct>%" labels drawn above boxes
    #[arg(long, global = true, value_name = "PATH")]
    label_font: Option<PathBuf>,
    /// Label text height in pixels
    #[arg(long, global = true, default_value_t = DEFAULT_LABEL_SIZE, value_parser = parse_label_size)]
    label_size: f32,
    /// Print build details and exit
    #[arg(long)]
    build_info: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render one detection result onto its image
    Render {
        /// Detection result JSON
        #[arg(long)]
        result: PathBuf,
        /// Original image; required unless the result carries an annotated image
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long)]
        max_width: Option<u32>,
        #[arg(long)]
        max_height: Option<u32>,
        /// Print the tooltip under a display point, e.g. `--hover 120,48`
        #[arg(long, value_name = "X,Y", value_parser = parse_point)]
        hover: Vec<(f32, f32)>,
        /// Output image (format from extension)
        #[arg(long)]
        out: PathBuf,
    },
    /// Review a batch result page by page
    Batch {
        /// Batch result JSON
        #[arg(long)]
        result: PathBuf,
        /// Directory or zip archive holding the uploaded images
        #[arg(long)]
        images: Option<PathBuf>,
        /// Page to show, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Render every item of the page into this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Show the settings in use; any value given is saved to the settings file
    Settings(SettingsArgs),
}

#[derive(Args, Debug, Default, PartialEq)]
struct SettingsArgs {
    #[arg(long)]
    page_size: Option<usize>,
    #[arg(long)]
    max_width: Option<u32>,
    #[arg(long)]
    max_height: Option<u32>,
    #[arg(long)]
    stroke_width: Option<f32>,
    #[arg(long)]
    tooltips: Option<bool>,
}

impl SettingsArgs {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(&self, settings: &mut UserSettings) {
        if let Some(page_size) = self.page_size {
            settings.page_size = page_size;
        }
        if let Some(width) = self.max_width {
            settings.max_display_width = width;
        }
        if let Some(height) = self.max_height {
            settings.max_display_height = height;
        }
        if let Some(stroke_width) = self.stroke_width {
            settings.stroke_width = stroke_width;
        }
        if let Some(tooltips) = self.tooltips {
            settings.show_tooltips = tooltips;
        }
    }
}

fn parse_point(value: &str) -> Result<(f32, f32), String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got '{value}'"))?;
    let x: f32 = x.trim().parse().map_err(|e| format!("invalid x '{x}': {e}"))?;
    let y: f32 = y.trim().parse().map_err(|e| format!("invalid y '{y}': {e}"))?;
    if !x.is_finite() || !y.is_finite() {
        return Err(format!("point '{value}' is not finite"));
    }
    Ok((x, y))
}

fn parse_label_size(value: &str) -> Result<f32, String> {
    let size: f32 = value.trim().parse().map_err(|e| format!("invalid size '{value}': {e}"))?;
    if !size.is_finite() || size <= 0.0 {
        return Err(format!("label size must be positive, got '{value}'"));
    }
    Ok(size)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let shared_log_buffer = logging::setup_logger(APP_NAME);
    logging::setup_panic_hook(APP_NAME, shared_log_buffer.clone());
    debug!("{} {}", APP_NAME, BuildInfo::CURRENT.version_line());

    if cli.build_info {
        println!("{}", BuildInfo::CURRENT);
        return Ok(());
    }

    let config = match cli.settings.as_deref() {
        Some(path) => Config::from(&UserSettings::load(Some(path))),
        None => CONFIG.clone(),
    };

    let labels = cli.label_font.as_deref().and_then(|path| match LabelFont::open(path, cli.label_size) {
        Ok(font) => {
            info!("Drawing labels with {}", path.display());
            Some(font)
        }
        Err(e) => {
            warn!("Could not load label font {}: {e}; labels disabled", path.display());
            None
        }
    });

    let outcome = match cli.command {
        Some(Commands::Render { result, image, max_width, max_height, hover, out }) => {
            let max = SurfaceSize::new(
                max_width.map_or(config.max_display.width, |w| w as f32),
                max_height.map_or(config.max_display.height, |h| h as f32),
            );
            run_render(&config, labels, &result, image.as_deref(), max, &hover, &out)
        }
        Some(Commands::Batch { result, images, page, out_dir }) => {
            run_batch(&config, labels, &result, images.as_deref(), page, out_dir.as_deref())
        }
        Some(Commands::Settings(args)) => run_settings(cli.settings.as_deref(), &args).map(|_| ()),
        None if cli.export_logs => Ok(()),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    };

    if let Err(e) = &outcome {
        error!("{e}");
    }

    if cli.export_logs {
        match logging::export_debug_logs(APP_NAME, &shared_log_buffer) {
            Ok(path) => println!("Debug logs exported to: {}", path.display()),
            Err(e) => eprintln!("Failed to export debug logs: {e}"),
        }
    }

    outcome
}

fn load_single(path: &Path) -> Result<DetectionResult, Box<dyn Error>> {
    let mut result = match Payload::from_file(path)? {
        Payload::Single(result) => result,
        Payload::Batch(_) => {
            return Err(format!("{} is a batch result; use `detlens batch`", path.display()).into());
        }
    };
    let (skipped, warnings) = result.validate_and_clean();
    for warning in &warnings {
        warn!("{warning}");
    }
    if skipped > 0 {
        info!("Skipped {skipped} unusable detections in {}", path.display());
    }
    Ok(result)
}

fn load_batch(path: &Path) -> Result<BatchResult, Box<dyn Error>> {
    let mut batch = match Payload::from_file(path)? {
        Payload::Batch(batch) => batch,
        Payload::Single(_) => {
            return Err(format!("{} is a single-image result; use `detlens render`", path.display()).into());
        }
    };
    let (skipped, warnings) = batch.validate_and_clean();
    for warning in &warnings {
        warn!("{warning}");
    }
    if skipped > 0 {
        info!("Skipped {skipped} unusable detections across the batch");
    }
    if batch.collection.counts.is_empty() {
        batch.recompute_collection();
    }
    Ok(batch)
}

fn new_renderer(config: &Config, labels: Option<LabelFont>) -> Renderer {
    let options = RenderMode::ClientOverlay.options(config.show_tooltips, config.stroke_width);
    Rc::new(RefCell::new(OverlayRenderer::with_sink(options, RasterSink::with_labels(labels))))
}

/// Mount `surface`, lay it out inside `max` and announce it as loaded. Returns the
/// displayed size.
fn present(bus: &EventBus<LayoutEvent>, surface: &Rc<RasterSurface>, max: SurfaceSize, tick: u64) -> SurfaceSize {
    bus.emit(&LayoutEvent::SurfaceMounted(Some(SurfaceHandle::from(Rc::clone(surface)))));
    let displayed = surface.layout(max);
    bus.emit(&LayoutEvent::ContentLoaded(tick));
    bus.emit(&LayoutEvent::ViewportResized(displayed));
    displayed
}

fn save_frame(frame: image::RgbaImage, out: &Path) -> Result<(), Box<dyn Error>> {
    let is_jpeg = out
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false);

    // JPEG has no alpha channel
    if is_jpeg {
        image::DynamicImage::ImageRgba8(frame).to_rgb8().save(out)?;
    } else {
        frame.save(out)?;
    }
    Ok(())
}

fn run_render(
    config: &Config,
    labels: Option<LabelFont>,
    result_path: &Path,
    image_path: Option<&Path>,
    max: SurfaceSize,
    hover: &[(f32, f32)],
    out: &Path,
) -> Result<(), Box<dyn Error>> {
    let result = load_single(result_path)?;
    let mut mode = RenderMode::for_result(&result);

    let surface = match (image_path, result.image_b64.as_deref()) {
        (Some(path), _) => {
            if mode == RenderMode::ServerAnnotated {
                info!("Drawing boxes over {} instead of the annotated image", path.display());
                mode = RenderMode::ClientOverlay;
            }
            RasterSurface::open(path)?
        }
        (None, Some(encoded)) if mode == RenderMode::ServerAnnotated => RasterSurface::from_base64(encoded)?,
        (None, _) => return Err("Result has no annotated image; pass --image".into()),
    };
    let surface = Rc::new(surface);

    let renderer = new_renderer(config, labels);
    {
        let mut renderer = renderer.borrow_mut();
        renderer.set_options(mode.options(config.show_tooltips, config.stroke_width));
        renderer.set_result(result.result_set());
    }

    let bus = EventBus::new();
    let subscription = OverlayRenderer::attach(&renderer, &bus);
    let displayed = present(&bus, &surface, max, 1);
    subscription.cancel();

    {
        let renderer = renderer.borrow();
        let overlay = renderer.overlay();
        println!(
            "{:?}: {} boxes on {:.0}x{:.0} (scale {:.4}x{:.4}), inference {:.1} ms",
            mode,
            overlay.boxes.len(),
            displayed.width,
            displayed.height,
            overlay.scale.x,
            overlay.scale.y,
            result.inference_ms
        );
        for line in summary_lines(&result.counts) {
            let class = line.split_once(' ').map_or("", |(_, class)| class);
            println!("  {line} {}", ClassStyle::for_class(class).hex());
        }
        for &(x, y) in hover {
            match overlay.tooltip_at(x, y) {
                Some(tooltip) => println!("({x}, {y}): {tooltip}"),
                None => println!("({x}, {y}): -"),
            }
        }
    }

    let frame = renderer
        .borrow_mut()
        .sink_mut()
        .take_frame()
        .ok_or("Nothing was rendered")?;
    save_frame(frame, out)?;
    info!("Wrote {}", out.display());
    println!("Saved {}", out.display());
    Ok(())
}

fn run_batch(
    config: &Config,
    labels: Option<LabelFont>,
    result_path: &Path,
    images: Option<&Path>,
    page: usize,
    out_dir: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let batch = load_batch(result_path)?;

    let params = &batch.params;
    println!(
        "conf={} imgsz={} device={} images={}",
        params.conf, params.imgsz, params.device, params.images
    );
    println!(
        "{} detections, {:.1} ms total inference",
        batch.collection.total, batch.collection.inference_ms_total
    );
    for line in summary_lines(&batch.collection.counts) {
        println!("  {line}");
    }
    for failed in batch.failed_items() {
        println!("  failed: {} ({})", failed.name, failed.error.as_deref().unwrap_or("unknown error"));
    }

    let total = batch.items.len();
    let mut pages = Pagination::new(config.page_size);
    pages.set_page(page.saturating_sub(1), total);
    println!("Page {}/{}", pages.page() + 1, pages.page_count(total));

    let page_items = pages.page_items(&batch.items);
    for item in page_items {
        match &item.error {
            Some(error) => println!("{}: error: {}", item.name, error),
            None => println!(
                "{}: {} detections, {:.1} ms",
                item.name, item.result.total, item.result.inference_ms
            ),
        }
    }

    if let Some(out_dir) = out_dir {
        let first_index = pages.range(total).start;
        for out in render_page(config, labels, page_items, first_index, images, out_dir)? {
            println!("Saved {}", out.display());
        }
    }
    Ok(())
}

/// Output file for the batch item at `index`. Uploads may share a stem, so the
/// position in the batch leads the name.
fn output_name(index: usize, name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("item");
    format!("{:04}_{}.png", index + 1, stem)
}

/// Render every successful item of a page into `out_dir`. `first_index` is the batch
/// position of `items[0]`. Returns the files written.
fn render_page(
    config: &Config,
    labels: Option<LabelFont>,
    items: &[BatchItem],
    first_index: usize,
    images: Option<&Path>,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    std::fs::create_dir_all(out_dir)?;
    let mut source = images.map(ImageSource::open).transpose()?;

    let renderer = new_renderer(config, labels);
    let bus = EventBus::new();
    let subscription = OverlayRenderer::attach(&renderer, &bus);
    let mut tick = 0;
    let mut written = Vec::new();

    for (offset, item) in items.iter().enumerate() {
        if !item.is_ok() {
            continue;
        }
        let mode = RenderMode::for_result(&item.result);
        let surface = match (mode, item.result.image_b64.as_deref(), source.as_mut()) {
            (RenderMode::ServerAnnotated, Some(encoded), _) => RasterSurface::from_base64(encoded),
            (_, _, Some(source)) => source
                .read(&item.name)
                .and_then(|bytes| Ok(RasterSurface::from_bytes(&bytes)?)),
            (_, _, None) => Err("no --images source for un-annotated item".into()),
        };
        let surface = match surface {
            Ok(surface) => Rc::new(surface),
            Err(e) => {
                match source.as_ref() {
                    Some(source) => warn!(
                        "Skipping {}: {} ({} images in {})",
                        item.name,
                        e,
                        source.image_names().len(),
                        source.path().display()
                    ),
                    None => warn!("Skipping {}: {}", item.name, e),
                }
                continue;
            }
        };

        {
            let mut renderer = renderer.borrow_mut();
            renderer.set_options(mode.options(config.show_tooltips, config.stroke_width));
            renderer.set_result(item.result.result_set());
        }
        tick += 1;
        present(&bus, &surface, config.max_display, tick);

        let Some(frame) = renderer.borrow_mut().sink_mut().take_frame() else {
            warn!("Nothing rendered for {}", item.name);
            continue;
        };
        let out = out_dir.join(output_name(first_index + offset, &item.name));
        save_frame(frame, &out)?;
        written.push(out);
    }

    subscription.cancel();
    debug!(
        "Rendered {} of {} items, {} frames drawn",
        written.len(),
        items.len(),
        renderer.borrow().sink().frames_drawn()
    );
    Ok(written)
}

/// Print the effective settings, saving them first when any value was given.
/// Returns the settings file path.
fn run_settings(custom_path: Option<&str>, args: &SettingsArgs) -> Result<PathBuf, Box<dyn Error>> {
    let path = custom_path.map_or_else(UserSettings::settings_path, PathBuf::from);
    let mut settings = UserSettings::load(custom_path);

    if args.is_empty() {
        println!("{}", path.display());
    } else {
        args.apply(&mut settings);
        settings = settings.sanitized();
        settings.save(custom_path)?;
        println!("Saved {}", path.display());
    }

    println!("page_size: {}", settings.page_size);
    println!("max_display: {}x{}", settings.max_display_width, settings.max_display_height);
    println!("stroke_width: {}", settings.stroke_width);
    println!("show_tooltips: {}", settings.show_tooltips);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use detlens::detection::{BoundingBox, Detection, ImageMeta};
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const GRAY: Rgba<u8> = Rgba([90, 90, 90, 255]);

    fn png_bytes(image: &RgbaImage) -> Vec<u8> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png).unwrap();
        png
    }

    fn batch_item(name: &str, image_b64: Option<String>) -> BatchItem {
        BatchItem {
            name: name.to_string(),
            error: None,
            result: DetectionResult {
                image: Some(ImageMeta { width: 40, height: 20 }),
                detections: vec![Detection {
                    bbox: BoundingBox::from_corners(4.0, 4.0, 20.0, 16.0),
                    class_id: None,
                    class_name: "1".to_string(),
                    confidence: 0.5,
                }],
                image_b64,
                ..DetectionResult::default()
            },
        }
    }

    fn test_config() -> Config {
        Config {
            max_display: SurfaceSize::new(100.0, 100.0),
            stroke_width: 1.0,
            ..Config::default()
        }
    }

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("10,20.5"), Ok((10.0, 20.5)));
        assert_eq!(parse_point(" 3 , 4 "), Ok((3.0, 4.0)));
        assert!(parse_point("10").is_err());
        assert!(parse_point("a,1").is_err());
        assert!(parse_point("inf,1").is_err());
    }

    #[test]
    fn test_parse_label_size() {
        assert_eq!(parse_label_size("18"), Ok(18.0));
        assert!(parse_label_size("0").is_err());
        assert!(parse_label_size("NaN").is_err());
    }

    #[test]
    fn test_cli_parses_render() {
        let cli = Cli::try_parse_from([
            "detlens", "render", "--result", "r.json", "--out", "o.png",
            "--hover", "1,2", "--hover", "3,4",
        ])
        .unwrap();
        assert_eq!(cli.label_size, DEFAULT_LABEL_SIZE);
        match cli.command {
            Some(Commands::Render { hover, image, .. }) => {
                assert_eq!(hover, vec![(1.0, 2.0), (3.0, 4.0)]);
                assert!(image.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_names_are_unique() {
        assert_eq!(output_name(0, "a.jpg"), "0001_a.png");
        assert_ne!(output_name(0, "a.jpg"), output_name(1, "a.png"));
        assert_ne!(output_name(3, "x/a.jpg"), output_name(4, "y/a.jpg"));
        assert_eq!(output_name(2, ""), "0003_item.png");
    }

    #[test]
    fn test_render_page_writes_every_item() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        std::fs::write(images.join("a.png"), png_bytes(&RgbaImage::from_pixel(40, 20, WHITE))).unwrap();

        let annotated = RgbaImage::from_pixel(40, 20, GRAY);
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(&annotated));

        let mut failed = batch_item("broken.png", None);
        failed.error = Some("cannot identify image file".to_string());
        let items = vec![
            batch_item("a.png", None),
            batch_item("uploads/a.png", None),
            batch_item("server.jpg", Some(encoded)),
            failed,
            batch_item("missing.png", None),
        ];

        let out_dir = dir.path().join("out");
        let written = render_page(&test_config(), None, &items, 12, Some(&images), &out_dir).unwrap();

        let names: Vec<_> = written
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["0013_a.png", "0014_a.png", "0015_server.png"]);

        let client = image::open(&written[0]).unwrap().to_rgba8();
        assert_eq!(client.dimensions(), (40, 20));
        assert_eq!(*client.get_pixel(4, 4), ClassStyle::Orange.color());
        assert_eq!(*client.get_pixel(10, 10), WHITE);

        // Server-annotated pixels already carry the boxes
        let server = image::open(&written[2]).unwrap().to_rgba8();
        assert_eq!(server, annotated);
    }

    #[test]
    fn test_render_page_without_source_keeps_annotated_only() {
        let dir = tempfile::tempdir().unwrap();
        let annotated = RgbaImage::from_pixel(40, 20, GRAY);
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(&annotated));
        let items = vec![batch_item("plain.png", None), batch_item("done.jpg", Some(encoded))];

        let written = render_page(&test_config(), None, &items, 0, None, dir.path()).unwrap();
        assert_eq!(written, vec![dir.path().join("0002_done.png")]);
    }

    #[test]
    fn test_render_rejects_batch_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"{"items": [], "collection": {}}"#).unwrap();

        let err = load_single(&path).unwrap_err();
        assert!(err.to_string().contains("detlens batch"));
        assert!(load_batch(&path).unwrap().items.is_empty());
    }

    #[test]
    fn test_settings_command_saves_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let custom = path.to_str();

        let shown = run_settings(custom, &SettingsArgs::default()).unwrap();
        assert_eq!(shown, path);
        assert!(!path.exists());

        let args = SettingsArgs { page_size: Some(5), tooltips: Some(false), ..SettingsArgs::default() };
        run_settings(custom, &args).unwrap();
        let saved = UserSettings::load(custom);
        assert_eq!(saved.page_size, 5);
        assert!(!saved.show_tooltips);
        assert_eq!(saved.stroke_width, UserSettings::default().stroke_width);

        let args = SettingsArgs { page_size: Some(0), ..SettingsArgs::default() };
        run_settings(custom, &args).unwrap();
        assert_eq!(UserSettings::load(custom).page_size, UserSettings::default().page_size);
    }
}
