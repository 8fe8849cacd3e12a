use crate::models::Chapter;
use crate::utils::truncate_chars;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Longest title kept for a chapter, in characters.
pub const MAX_TITLE_CHARS: usize = 50;

/// Leading untitled text longer than this (in characters) becomes its own chapter.
pub const PREAMBLE_THRESHOLD: usize = 100;

pub const PREAMBLE_TITLE: &str = "前言";

// Order matters: hits at the same offset keep whichever pattern found them first.
static CHAPTER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?m)^第[一二三四五六七八九十百千万零〇两\d]+[章节回集卷部篇]", // 第一章, 第12回
        r"(?mi)^chapter\s*\d+",                                           // Chapter 3
        r"(?m)^卷[一二三四五六七八九十\d]+",                              // 卷一
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("built-in chapter pattern"))
    .collect()
});

/// Returns true when `text` begins with a recognised chapter marker.
pub fn is_chapter_title(text: &str) -> bool {
    CHAPTER_PATTERNS
        .iter()
        .any(|re| re.find(text).is_some_and(|m| m.start() == 0))
}

/// Splits `content` into chapters that tile `[0, content.len())`.
///
/// Offsets are byte offsets. Text without any recognised marker becomes a
/// single chapter titled `fallback_title`.
pub fn segment(content: &str, fallback_title: &str) -> Vec<Chapter> {
    let mut matches: Vec<(usize, String)> = Vec::new();
    let mut seen = HashSet::new();

    for re in CHAPTER_PATTERNS.iter() {
        for m in re.find_iter(content) {
            let offset = m.start();
            // Same offset from an earlier pattern wins
            if !seen.insert(offset) {
                continue;
            }
            matches.push((offset, title_line(content, offset)));
        }
    }
    matches.sort_by_key(|(offset, _)| *offset);

    if matches.is_empty() {
        return vec![Chapter {
            index: 0,
            title: fallback_title.to_string(),
            start_offset: 0,
            end_offset: content.len(),
        }];
    }

    let mut chapters: Vec<Chapter> = matches
        .iter()
        .enumerate()
        .map(|(idx, (offset, title))| Chapter {
            index: idx,
            title: title.clone(),
            start_offset: *offset,
            end_offset: matches
                .get(idx + 1)
                .map(|(next, _)| *next)
                .unwrap_or(content.len()),
        })
        .collect();

    let first = chapters[0].start_offset;
    if content[..first].chars().count() > PREAMBLE_THRESHOLD {
        chapters.insert(
            0,
            Chapter {
                index: 0,
                title: PREAMBLE_TITLE.to_string(),
                start_offset: 0,
                end_offset: first,
            },
        );
        for (idx, chapter) in chapters.iter_mut().enumerate() {
            chapter.index = idx;
        }
    } else {
        // Short lead-in text is folded into the first chapter
        chapters[0].start_offset = 0;
    }

    tracing::debug!(chapters = chapters.len(), bytes = content.len(), "segmented document");
    chapters
}

fn title_line(content: &str, offset: usize) -> String {
    let rest = &content[offset..];
    let line = rest.split('\n').next().unwrap_or(rest);
    truncate_chars(line.trim(), MAX_TITLE_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(chapters: &[Chapter], len: usize) {
        assert_eq!(chapters.first().map(|c| c.start_offset), Some(0));
        assert_eq!(chapters.last().map(|c| c.end_offset), Some(len));
        for (idx, pair) in chapters.windows(2).enumerate() {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
            assert!(pair[0].start_offset < pair[1].start_offset);
            assert_eq!(pair[0].index, idx);
        }
    }

    #[test]
    fn no_markers_yields_single_fallback_chapter() {
        let chapters = segment("hello\nworld", "My Book");
        assert_eq!(
            chapters,
            vec![Chapter {
                index: 0,
                title: "My Book".to_string(),
                start_offset: 0,
                end_offset: 11,
            }]
        );
    }

    #[test]
    fn empty_document_is_one_empty_chapter() {
        let chapters = segment("", "正文");
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].end_offset, 0);
    }

    #[test]
    fn long_front_matter_gets_its_own_chapter() {
        let preamble = "a".repeat(149) + "\n";
        let text = format!("{preamble}第一章 开始\n很久很久以前。\n");
        let chapters = segment(&text, "书");

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, PREAMBLE_TITLE);
        assert_eq!((chapters[0].start_offset, chapters[0].end_offset), (0, 150));
        assert_eq!(chapters[1].index, 1);
        assert_eq!(chapters[1].start_offset, 150);
        assert_eq!(chapters[1].title, "第一章 开始");
        assert_tiles(&chapters, text.len());
    }

    #[test]
    fn short_front_matter_is_folded_into_first_chapter() {
        let text = "序\n第一章 起\n内容\n第二章 承\n更多内容";
        let chapters = segment(text, "书");
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].start_offset, 0);
        assert_eq!(chapters[0].title, "第一章 起");
        assert_tiles(&chapters, text.len());
    }

    #[test]
    fn mixed_markers_are_sorted_by_offset() {
        let text = "Chapter 1 Beginnings\nfoo\n卷二 下卷\nbar\nCHAPTER 3\nbaz\n第十回 终\nend";
        let chapters = segment(text, "book");
        let titles: Vec<&str> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Chapter 1 Beginnings", "卷二 下卷", "CHAPTER 3", "第十回 终"]);
        assert_tiles(&chapters, text.len());
    }

    #[test]
    fn markers_must_start_a_line() {
        let text = "he read chapter 5 yesterday\nand 第一章 too";
        assert_eq!(segment(text, "fallback").len(), 1);
    }

    #[test]
    fn titles_are_truncated_to_fifty_chars() {
        let text = format!("第一章 {}\nbody", "长".repeat(80));
        let chapters = segment(&text, "x");
        assert_eq!(chapters[0].title.chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn is_chapter_title_recognises_each_family() {
        assert!(is_chapter_title("第三百二十章 风起"));
        assert!(is_chapter_title("chapter12"));
        assert!(is_chapter_title("卷三"));
        assert!(!is_chapter_title("序言"));
        assert!(!is_chapter_title("序言\n第一章 开始"));
    }
}
