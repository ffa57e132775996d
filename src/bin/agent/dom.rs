use browser_agent::{PageSnapshot, SurfaceError};
use headless_chrome::Tab;

/// JavaScript injected into the page to describe it as JSON.
/// Reads the DOM and only adds a `data-eid` attribute to elements of
/// interest, so later clicks can address them by selector.
///
/// The script:
///   1. Skips script, style, noscript, svg and link subtrees.
///   2. Collects interactive elements (links, buttons, form controls and
///      anything carrying a role, an onclick handler or a data-test hook),
///      up to MAX elements.
///   3. Records text, attributes, visibility, enabled state and whether the
///      element sits inside a form.
///   4. Collects the text of h1-h3 headings.
const SNAPSHOT_JS: &str = r#"
(() => {
  const MAX = 300;
  const SKIP = 'script, style, noscript, svg, link';
  const INTERESTING = [
    'a', 'button', 'input', 'textarea', 'select',
    '[role]', '[onclick]', '[data-testid]', '[data-test]', '[data-qa]', '[data-cy]',
  ].join(',');
  const CLICKABLE = new Set(['a', 'button', 'input', 'select', 'textarea']);

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  const elements = [];
  let id = 0;
  for (const el of document.querySelectorAll(INTERESTING)) {
    if (elements.length >= MAX) break;
    if (el.closest(SKIP)) continue;
    const tag = el.tagName.toLowerCase();
    const eid = 'e' + (id++);
    el.setAttribute('data-eid', eid);

    const attributes = {};
    for (const attr of el.attributes) {
      if (attr.name === 'style' || attr.name === 'data-eid') continue;
      attributes[attr.name] = String(attr.value).slice(0, 120);
    }
    if ((tag === 'input' || tag === 'textarea') && el.value) {
      attributes['value'] = String(el.value).slice(0, 60);
    }

    elements.push({
      eid,
      tag,
      text: (el.innerText || el.textContent || '').trim().replace(/\s+/g, ' ').slice(0, 80),
      attributes,
      visible: isVisible(el),
      enabled: !el.disabled,
      inForm: el.closest('form') !== null,
      clickable: CLICKABLE.has(tag) || el.hasAttribute('onclick') || el.getAttribute('role') === 'button',
    });
  }

  const headings = [...document.querySelectorAll('h1, h2, h3')]
    .filter(isVisible)
    .map(h => (h.innerText || '').trim().replace(/\s+/g, ' ').slice(0, 100))
    .filter(t => t.length > 0)
    .slice(0, 20);

  return JSON.stringify({
    url: window.location.href,
    title: document.title || '',
    elements,
    headings,
  });
})()
"#;

/// Stamp the page and read it back as a [`PageSnapshot`].
pub fn capture_snapshot(tab: &Tab) -> Result<PageSnapshot, SurfaceError> {
    let result = tab
        .evaluate(SNAPSHOT_JS, false)
        .map_err(|e| SurfaceError::Driver(format!("snapshot script failed: {e}")))?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| SurfaceError::Driver("snapshot script returned nothing".into()))?;

    serde_json::from_str(&raw).map_err(|e| SurfaceError::Driver(format!("invalid snapshot: {e}")))
}
