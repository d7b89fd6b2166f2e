/// Inline browser client for the push channel.
///
/// Opens the channel with the page's nonce, swaps `document.body` for every
/// pushed page and ignores heartbeats. A 422 or a lost stream restarts the
/// handshake: a plain GET for a fresh page and nonce, then a new channel.
pub const JAVASCRIPT: &str = r#"
(function () {
  if (window.__liveUpdates) return;
  window.__liveUpdates = true;

  const META = 'meta[name="live-updates-nonce"]';
  const RETRY_MS = [250, 1000, 3000, 10000];
  let nonce = readNonce(document);
  let attempt = 0;
  let leaving = false;

  function readNonce(doc) {
    const meta = doc.querySelector(META);
    return meta ? meta.getAttribute('content') : null;
  }

  function setStatus(state) {
    const el = document.getElementById('live-status');
    if (!el) return;
    el.dataset.state = state;
    el.textContent = state === 'live' ? 'live' : 'reconnecting';
  }

  function apply(html) {
    const doc = new DOMParser().parseFromString(html, 'text/html');
    // Pushed pages embed the same nonce. Adopted scripts do not run again.
    document.title = doc.title;
    document.body.replaceWith(document.adoptNode(doc.body));
    setStatus('live');
  }

  async function refresh() {
    const response = await fetch(location.href, { credentials: 'same-origin', cache: 'no-store' });
    const fresh = response.headers.get('Live-Updates');
    const html = await response.text();
    const doc = new DOMParser().parseFromString(html, 'text/html');
    nonce = fresh || readNonce(doc);
    document.title = doc.title;
    document.body.replaceWith(document.adoptNode(doc.body));
  }

  async function listen() {
    const response = await fetch(location.href, {
      credentials: 'same-origin',
      cache: 'no-store',
      headers: { 'Live-Updates': nonce },
    });
    if (response.status === 422) return 'rejected';
    if (!response.ok || !response.body) return 'lost';

    setStatus('live');
    attempt = 0;
    const reader = response.body.pipeThrough(new TextDecoderStream()).getReader();
    let buffer = '';
    for (;;) {
      const { value, done } = await reader.read();
      if (done) return 'lost';
      buffer += value;
      let newline;
      while ((newline = buffer.indexOf('\n')) >= 0) {
        const unit = buffer.slice(0, newline);
        buffer = buffer.slice(newline + 1);
        if (unit.trim() === '') continue;
        apply(JSON.parse(unit));
      }
    }
  }

  async function run() {
    while (!leaving && nonce) {
      let outcome;
      try {
        outcome = await listen();
      } catch (e) {
        outcome = 'lost';
      }
      if (leaving) return;
      setStatus('reconnecting');
      await new Promise((r) => setTimeout(r, RETRY_MS[Math.min(attempt, RETRY_MS.length - 1)]));
      attempt += 1;
      try {
        await refresh();
      } catch (e) {
        // Offline; keep the old nonce and try again after the next delay.
      }
    }
  }

  window.addEventListener('pagehide', function () {
    leaving = true;
    if (!nonce) return;
    fetch(location.href, {
      method: 'HEAD',
      keepalive: true,
      credentials: 'same-origin',
      headers: { 'Live-Updates-Abort': nonce },
    });
  });

  run();
})();
"#;
