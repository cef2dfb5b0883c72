use crate::models::Concept;
use printpdf::*;
use std::io::BufWriter;

const LINE_HEIGHT: f32 = 7.0;
const TOP: f32 = 275.0;
const BOTTOM: f32 = 20.0;

/// Text-only concept sheet: summary and ingredients first, then the recipe steps.
pub fn render_concept_sheet(concept: &Concept) -> Vec<u8> {
    let (doc, first_page, first_layer) = PdfDocument::new(
        format!("Concept: {}", truncate(&concept.name, 48)),
        Mm(210.0),
        Mm(297.0),
        "Summary",
    );
    let Ok(font) = doc.add_builtin_font(BuiltinFont::Helvetica) else {
        return Vec::new();
    };

    let summary = doc.get_page(first_page).get_layer(first_layer);
    summary.use_text(truncate(&concept.name, 60), 20.0, Mm(15.0), Mm(TOP), &font);
    summary.use_text(truncate(&concept.description, 140), 10.0, Mm(15.0), Mm(TOP - 13.0), &font);
    summary.use_text(
        format!(
            "Cost: {} JPY   Suggested price: {} JPY   Margin: {}%",
            concept.total_cost, concept.suggested_price, concept.profit_margin
        ),
        11.0, Mm(15.0), Mm(TOP - 25.0), &font,
    );
    summary.use_text("Ingredients", 14.0, Mm(15.0), Mm(TOP - 40.0), &font);

    let positions = line_positions(concept.ingredients.len(), TOP - 40.0 - LINE_HEIGHT - 2.0, LINE_HEIGHT);
    let mut layer = summary;
    let mut current_page = 0;
    for (ingredient, (page, y)) in concept.ingredients.iter().zip(positions) {
        if page != current_page {
            layer = add_section_page(&doc, "Ingredients (continued)", &font);
            current_page = page;
        }
        layer.use_text(
            format!("{} ({}) - {} JPY", truncate(&ingredient.name, 50), truncate(&ingredient.amount, 30), ingredient.cost),
            10.0, Mm(20.0), Mm(y), &font,
        );
    }

    if !concept.recipe.is_empty() {
        let positions = line_positions(concept.recipe.len(), TOP - 15.0, LINE_HEIGHT * 1.5);
        let mut layer = add_section_page(&doc, "Recipe", &font);
        let mut current_page = 0;
        for (step, (page, y)) in concept.recipe.iter().zip(positions) {
            if page != current_page {
                layer = add_section_page(&doc, "Recipe (continued)", &font);
                current_page = page;
            }
            layer.use_text(format!("{}. {}", step.step, truncate(&step.description, 110)), 10.0, Mm(15.0), Mm(y), &font);
        }
    }

    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut buf);
        doc.save(&mut writer).ok();
    }
    buf
}

fn add_section_page(doc: &PdfDocumentReference, heading: &str, font: &IndirectFontRef) -> PdfLayerReference {
    let (page, layer) = doc.add_page(Mm(210.0), Mm(297.0), heading);
    let layer = doc.get_page(page).get_layer(layer);
    layer.use_text(heading, 16.0, Mm(15.0), Mm(TOP), font);
    layer
}

/// Page index and baseline for each of `count` lines. Page 0 starts at `first_y`;
/// every later page starts below its heading.
fn line_positions(count: usize, first_y: f32, spacing: f32) -> Vec<(usize, f32)> {
    let mut page = 0;
    let mut y = first_y;
    (0..count).map(|_| {
        if y < BOTTOM {
            page += 1;
            y = TOP - 15.0;
        }
        let position = (page, y);
        y -= spacing;
        position
    }).collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { s.to_string() } else { format!("{}…", s.chars().take(max).collect::<String>()) }
}
