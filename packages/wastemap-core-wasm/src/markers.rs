use crate::config::PinStyle;
use crate::pins::PinData;
use crate::sdk::{MarkerOptions, ScreenPoint};

const SELECTED_Z_INDEX: i32 = 10;

/// Icon family for a waste category.
pub fn category_slug(category: &str) -> &'static str {
    match category {
        "음식물" => "food",
        "재활용" => "recycle",
        "일반" | "생활" => "general",
        "대형" => "bulky",
        "" => "default",
        _ => "etc",
    }
}

pub fn icon_url(style: &PinStyle, pin: &PinData) -> String {
    format!(
        "{}/{}{}.png",
        style.icon_base_path.trim_end_matches('/'),
        category_slug(&pin.category),
        if pin.is_repeat { "-repeat" } else { "" }
    )
}

pub fn marker_options(style: &PinStyle, pin: &PinData, selected: bool) -> MarkerOptions {
    let size = if selected { &style.selected } else { &style.normal };
    MarkerOptions {
        position: pin.position(),
        image_url: icon_url(style, pin),
        size: size.size,
        offset: ScreenPoint::new(size.anchor_x, size.anchor_y),
        title: pin.address.clone(),
        z_index: if selected { SELECTED_Z_INDEX } else { 0 },
    }
}

/// Info-window markup. Record text is escaped; layout is left to host CSS.
pub fn info_window_html(pin: &PinData) -> String {
    let mut html = String::with_capacity(256);
    html.push_str("<div class=\"pin-info");
    if pin.is_repeat {
        html.push_str(" pin-info--repeat");
    }
    html.push_str("\">");
    push_row(&mut html, "address", &pin.address);
    if !pin.category.is_empty() {
        push_row(&mut html, "category", &pin.category);
    }
    push_row(&mut html, "status", &pin.status);
    push_row(&mut html, "datetime", &pin.datetime);
    push_row(&mut html, "content", &pin.content);
    if pin.record_ids.len() > 1 {
        push_row(&mut html, "count", &format!("{}건", pin.record_ids.len()));
    }
    html.push_str("</div>");
    html
}

fn push_row(html: &mut String, class: &str, text: &str) {
    html.push_str("<p class=\"pin-info__");
    html.push_str(class);
    html.push_str("\">");
    html.push_str(&escape_html(text));
    html.push_str("</p>");
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::group_records;
    use crate::sdk::LatLng;
    use crate::testing::record;

    fn pin(category: &str, repeat: bool) -> PinData {
        let rec = record(1, "서울시 중구").categories(&[category]).repeat(repeat).build();
        group_records(&[rec]).remove(0).into_pin(LatLng::new(37.0, 127.0))
    }

    #[test]
    fn icon_reflects_category_and_repeat() {
        let style = PinStyle::default();
        assert_eq!(icon_url(&style, &pin("음식물", false)), "/images/markers/food.png");
        assert_eq!(icon_url(&style, &pin("재활용", true)), "/images/markers/recycle-repeat.png");
        assert_eq!(icon_url(&style, &pin("manager", false)), "/images/markers/default.png");
    }

    #[test]
    fn selected_marker_is_enlarged() {
        let style = PinStyle::default();
        let p = pin("음식물", false);
        let normal = marker_options(&style, &p, false);
        let selected = marker_options(&style, &p, true);
        assert!(selected.size.width > normal.size.width);
        assert!(selected.offset.y > normal.offset.y);
        assert!(selected.z_index > normal.z_index);
    }

    #[test]
    fn info_window_escapes_record_text() {
        let mut p = pin("음식물", false);
        p.content = "<script>alert('x')</script> & more".to_string();
        let html = info_window_html(&p);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; more"));
    }
}
