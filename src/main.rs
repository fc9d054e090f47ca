use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use manga_region_translator::geometry::{PixelBox, Point};
use manga_region_translator::{
    Command, Config, NormalizedRegion, PageRef, RecognitionMode, RecognizeRequest, RegionInput,
    SaveFailed,
};

#[derive(Parser, Debug)]
#[command(
    name = "manga-region-translator",
    version,
    about = "Recognize, translate and keep text selected on manga pages"
)]
struct Cli {
    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings", global = true)]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Recognize and translate a region of a page image
    Recognize {
        /// Page image file
        image: PathBuf,

        /// Region as fractions of the image: x,y,w,h
        #[arg(long = "region", value_parser = parse_region, conflicts_with = "drag")]
        region: Option<NormalizedRegion>,

        /// Pointer drag in pixels: x1,y1,x2,y2
        #[arg(long = "drag", value_parser = parse_drag)]
        drag: Option<DragArg>,

        /// Rendered image box for --drag: left,top,width,height (default: natural size)
        #[arg(long = "image-box", value_parser = parse_box, requires = "drag")]
        image_box: Option<PixelBox>,

        /// Container scroll offset for --drag: x,y
        #[arg(long = "scroll", value_parser = parse_point, requires = "drag")]
        scroll: Option<Point>,

        /// Chapter id (default: image file name)
        #[arg(short = 'c', long = "chapter")]
        chapter: Option<String>,

        /// Page index within the chapter
        #[arg(short = 'p', long = "page", default_value_t = 0)]
        page: u32,

        /// remote-first, remote-only or local-only (default: from settings)
        #[arg(short = 'm', long = "mode", value_parser = parse_mode)]
        mode: Option<RecognitionMode>,

        /// Save the result as a history entry of the page
        #[arg(long = "save")]
        save: bool,

        /// Save the result to the vault
        #[arg(long = "vault")]
        vault: bool,
    },
    /// List saved entries of a page, newest first
    History {
        #[arg(short = 'c', long = "chapter")]
        chapter: String,
        #[arg(short = 'p', long = "page", default_value_t = 0)]
        page: u32,
    },
    /// Show or hide a history entry
    Toggle {
        id: String,
        #[arg(short = 'c', long = "chapter")]
        chapter: String,
        #[arg(short = 'p', long = "page", default_value_t = 0)]
        page: u32,
    },
    /// Delete a history entry
    Forget {
        id: String,
        #[arg(short = 'c', long = "chapter")]
        chapter: String,
        #[arg(short = 'p', long = "page", default_value_t = 0)]
        page: u32,
    },
    /// Manage saved words and phrases
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },
    /// Serve the remote recognition endpoint
    Serve,
}

#[derive(Debug, Clone, Copy)]
struct DragArg {
    start: Point,
    end: Point,
}

#[derive(Subcommand, Debug)]
enum VaultAction {
    List,
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    manga_region_translator::logging::init(cli.verbose)?;
    let config = Config {
        settings_path: cli.read_settings,
    };
    let command = into_command(cli.command)?;
    let output = match manga_region_translator::run(config, command).await {
        Ok(output) => output,
        Err(err) => {
            if let Some(failed) = err.downcast_ref::<SaveFailed>() {
                println!("{}", failed.output);
            }
            return Err(err);
        }
    };
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

fn into_command(command: CliCommand) -> Result<Command> {
    Ok(match command {
        CliCommand::Recognize {
            image,
            region,
            drag,
            image_box,
            scroll,
            chapter,
            page,
            mode,
            save,
            vault,
        } => {
            let region = match (region, drag) {
                (Some(region), _) => RegionInput::Normalized(region),
                (None, Some(drag)) => RegionInput::Drag {
                    start: drag.start,
                    end: drag.end,
                    image_box,
                    scroll: scroll.unwrap_or_default(),
                },
                (None, None) => return Err(anyhow!("either --region or --drag is required")),
            };
            Command::Recognize(RecognizeRequest {
                image,
                region,
                chapter,
                page,
                mode,
                save,
                vault,
            })
        }
        CliCommand::History { chapter, page } => Command::History {
            page: PageRef::new(chapter, page),
        },
        CliCommand::Toggle { id, chapter, page } => Command::Toggle {
            page: PageRef::new(chapter, page),
            id,
        },
        CliCommand::Forget { id, chapter, page } => Command::Forget {
            page: PageRef::new(chapter, page),
            id,
        },
        CliCommand::Vault { action } => match action {
            VaultAction::List => Command::VaultList,
            VaultAction::Delete { id } => Command::VaultDelete { id },
        },
        CliCommand::Serve => Command::Serve,
    })
}

fn parse_numbers<const N: usize>(value: &str) -> Result<[f64; N], String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("invalid number in '{}': {}", value, err))?;
    parts
        .try_into()
        .map_err(|parts: Vec<f64>| format!("expected {} comma-separated numbers, got {}", N, parts.len()))
}

fn parse_region(value: &str) -> Result<NormalizedRegion, String> {
    let [x, y, w, h] = parse_numbers::<4>(value)?;
    Ok(NormalizedRegion::new(x, y, w, h))
}

fn parse_drag(value: &str) -> Result<DragArg, String> {
    let [x1, y1, x2, y2] = parse_numbers::<4>(value)?;
    Ok(DragArg {
        start: Point::new(x1, y1),
        end: Point::new(x2, y2),
    })
}

fn parse_box(value: &str) -> Result<PixelBox, String> {
    let [left, top, width, height] = parse_numbers::<4>(value)?;
    Ok(PixelBox::new(left, top, width, height))
}

fn parse_point(value: &str) -> Result<Point, String> {
    let [x, y] = parse_numbers::<2>(value)?;
    Ok(Point::new(x, y))
}

fn parse_mode(value: &str) -> Result<RecognitionMode, String> {
    RecognitionMode::parse(value).ok_or_else(|| {
        format!(
            "unknown mode '{}' (expected remote-first, remote-only or local-only)",
            value
        )
    })
}
