use crate::models::{PageLayout, Viewport};
use serde::{Deserialize, Serialize};

/// Used in place of a non-positive or non-finite font size.
const FALLBACK_FONT_SIZE: f32 = 16.0;

/// Space reserved around the text area, in the viewport's units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub vertical_padding: f32,
    pub horizontal_padding: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            vertical_padding: 120.0,
            horizontal_padding: 40.0,
        }
    }
}

/// Estimates page geometry for one chapter at a time.
///
/// Line counts are estimated from character counts; [`PaginationEngine::refine`]
/// replaces the estimate once the host has measured the rendered height.
#[derive(Debug, Clone)]
pub struct PaginationEngine {
    config: LayoutConfig,
    viewport: Viewport,
    font_size: f32,
    content: String,
    measured_height: Option<f32>,
    layout: PageLayout,
}

impl PaginationEngine {
    pub fn new(config: LayoutConfig, viewport: Viewport, font_size: f32) -> Self {
        let mut engine = Self {
            config,
            viewport,
            font_size: sanitize_font_size(font_size),
            content: String::new(),
            measured_height: None,
            layout: PageLayout {
                line_height: 0.0,
                lines_per_page: 1,
                content_area_height: 0.0,
                total_pages: 1,
                current_page: 0,
                page_offset_y: 0.0,
            },
        };
        engine.estimate();
        engine
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    /// First pass: estimates the layout of `content` for the given viewport and font size.
    pub fn compute_layout(&mut self, content: &str, viewport: Viewport, font_size: f32) -> PageLayout {
        self.content = content.to_string();
        self.viewport = viewport;
        self.font_size = sanitize_font_size(font_size);
        self.measured_height = None;
        self.estimate()
    }

    /// Second pass: re-derives the page count from the measured rendered height.
    pub fn refine(&mut self, measured_height: f32) -> PageLayout {
        let measured = if measured_height.is_finite() {
            measured_height.max(0.0)
        } else {
            0.0
        };
        self.measured_height = Some(measured);

        let total_lines = (measured / self.layout.line_height).ceil() as usize;
        self.layout.total_pages = pages_for(total_lines, self.layout.lines_per_page);
        self.go_to_page(self.layout.current_page)
    }

    /// Changing the font size discards any measured height.
    pub fn set_font_size(&mut self, font_size: f32) -> PageLayout {
        self.font_size = sanitize_font_size(font_size);
        self.measured_height = None;
        self.estimate()
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> PageLayout {
        self.viewport = viewport;
        self.measured_height = None;
        self.estimate()
    }

    pub fn is_refined(&self) -> bool {
        self.measured_height.is_some()
    }

    /// Moves to `page`, clamped to the valid range.
    pub fn go_to_page(&mut self, page: usize) -> PageLayout {
        let page = page.min(self.layout.total_pages - 1);
        self.layout.current_page = page;
        self.layout.page_offset_y =
            page as f32 * self.layout.lines_per_page as f32 * self.layout.line_height;
        self.layout
    }

    /// Returns `None` on the last page.
    pub fn next_page(&mut self) -> Option<PageLayout> {
        let next = self.layout.current_page + 1;
        (next < self.layout.total_pages).then(|| self.go_to_page(next))
    }

    /// Returns `None` on the first page.
    pub fn prev_page(&mut self) -> Option<PageLayout> {
        let prev = self.layout.current_page.checked_sub(1)?;
        Some(self.go_to_page(prev))
    }

    pub fn chars_per_line(&self) -> usize {
        chars_per_line(&self.config, self.viewport, self.font_size)
    }

    /// The estimated text shown on the current page.
    ///
    /// Source lines are wrapped every [`Self::chars_per_line`] characters; an
    /// empty source line occupies one visual line.
    pub fn page_text(&self) -> String {
        let per_line = self.chars_per_line();
        let first = self.layout.current_page * self.layout.lines_per_page;
        let last = first + self.layout.lines_per_page;

        let mut visual = 0usize;
        let mut out: Vec<String> = Vec::new();
        for line in self.content.split('\n') {
            let chars: Vec<char> = line.chars().collect();
            let rows = chars.len().div_ceil(per_line).max(1);
            if visual + rows <= first {
                visual += rows;
                continue;
            }
            for row in 0..rows {
                if visual >= last {
                    return out.join("\n");
                }
                if visual >= first {
                    let start = (row * per_line).min(chars.len());
                    let end = (start + per_line).min(chars.len());
                    out.push(chars[start..end].iter().collect());
                }
                visual += 1;
            }
        }
        out.join("\n")
    }

    fn estimate(&mut self) -> PageLayout {
        let line_height = self.font_size * 2.0;
        let content_area_height = (self.viewport.height - self.config.vertical_padding).max(0.0);
        let lines_per_page = if content_area_height.is_finite() {
            ((content_area_height / line_height).floor() as usize).max(1)
        } else {
            1
        };

        let per_line = self.chars_per_line();
        let total_lines: usize = self
            .content
            .split('\n')
            .map(|line| line.chars().count().div_ceil(per_line).max(1))
            .sum();

        self.layout.line_height = line_height;
        self.layout.content_area_height = content_area_height;
        self.layout.lines_per_page = lines_per_page;
        self.layout.total_pages = pages_for(total_lines, lines_per_page);
        self.go_to_page(self.layout.current_page)
    }
}

fn sanitize_font_size(font_size: f32) -> f32 {
    if font_size.is_finite() && font_size > 0.0 {
        font_size
    } else {
        FALLBACK_FONT_SIZE
    }
}

fn chars_per_line(config: &LayoutConfig, viewport: Viewport, font_size: f32) -> usize {
    let usable = viewport.width - config.horizontal_padding;
    if !usable.is_finite() || usable <= 0.0 {
        return 1;
    }
    ((usable / font_size).floor() as usize).max(1)
}

fn pages_for(total_lines: usize, lines_per_page: usize) -> usize {
    total_lines.div_ceil(lines_per_page).max(1)
}
