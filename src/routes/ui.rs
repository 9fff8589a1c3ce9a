use axum::{response::Html, routing::get, Router};

pub fn router() -> Router {
    Router::new().route("/", get(index))
}

async fn index() -> Html<&'static str> {
    Html(r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Oxidized Analyst - Ask your data</title>
  <style>
    :root { --bg: #0e1117; --panel: #161b22; --border: #30363d; --text: #e6edf3; --muted: #8b949e; --accent: #ff4b4b; --ok: #3fb950; --warn: #d29922; }
    body { font-family: "Source Sans Pro", Arial, sans-serif; margin: 0; background: var(--bg); color: var(--text); display: flex; min-height: 100vh; }
    aside { width: 300px; background: var(--panel); border-right: 1px solid var(--border); padding: 1.5rem; box-sizing: border-box; }
    main { flex: 1; padding: 2rem 3rem; max-width: 1100px; }
    h1 { margin-top: 0; }
    h2 { font-size: 1.1rem; margin-top: 1.5rem; }
    label { display: block; margin-top: 0.75rem; color: var(--muted); font-size: 0.9rem; }
    input, textarea, select { width: 100%; padding: 0.5rem; background: var(--bg); color: var(--text); border: 1px solid var(--border); border-radius: 6px; box-sizing: border-box; }
    button { margin-top: 0.75rem; padding: 0.5rem 1rem; background: var(--accent); color: white; border: none; border-radius: 6px; cursor: pointer; }
    button.secondary { background: transparent; border: 1px solid var(--border); color: var(--text); }
    .status { margin-top: 0.5rem; font-size: 0.9rem; }
    .ok { color: var(--ok); } .warn { color: var(--warn); } .err { color: var(--accent); }
    .card { border: 1px solid var(--border); background: var(--panel); padding: 1rem; border-radius: 8px; margin-bottom: 1rem; overflow-x: auto; }
    table { border-collapse: collapse; font-size: 0.85rem; }
    th, td { border: 1px solid var(--border); padding: 0.25rem 0.5rem; text-align: left; }
    .meta { color: var(--muted); font-size: 0.85rem; }
    details { margin-top: 0.5rem; color: var(--muted); }
    pre { white-space: pre-wrap; }
  </style>
</head>
<body>
  <aside>
    <h2>API Key</h2>
    <input id="apiKey" type="password" placeholder="Enter your API key" />
    <button id="saveKey">Save</button>
    <div id="keyStatus" class="status"></div>

    <h2>File format</h2>
    <label><input type="radio" name="format" value="csv" checked style="width:auto" /> CSV</label>
    <label><input type="radio" name="format" value="excel" style="width:auto" /> Excel</label>

    <h2>Merge keys</h2>
    <input id="mergeKeys" placeholder="all shared columns" />
    <button id="saveKeys" class="secondary">Apply</button>
  </aside>

  <main>
    <h1>Ask your data</h1>
    <p class="meta" id="phase"></p>

    <div class="card">
      <label>Upload your first data file</label>
      <input id="primaryFile" type="file" accept=".csv,.xls,.xlsx" />
      <button id="removePrimary" class="secondary">Remove</button>
      <div id="primaryView"></div>
    </div>

    <div class="card" id="secondaryCard">
      <label>Upload your second data file (optional)</label>
      <input id="secondaryFile" type="file" accept=".csv,.xls,.xlsx" />
      <button id="removeSecondary" class="secondary">Remove</button>
      <div id="secondaryView"></div>
      <div id="mergeView"></div>
    </div>

    <div class="card">
      <label>Ask a question about your data</label>
      <textarea id="question" rows="3"></textarea>
      <button id="askBtn">Submit</button>
      <div id="askStatus" class="status"></div>
    </div>

    <div id="history"></div>
  </main>

  <script>
    let sessionId = null;
    const $ = (id) => document.getElementById(id);

    async function call(method, path, body, isForm) {
      const opts = { method };
      if (body && isForm) { opts.body = body; }
      else if (body) { opts.headers = { 'Content-Type': 'application/json' }; opts.body = JSON.stringify(body); }
      const res = await fetch(`/api/sessions/${sessionId}${path}`, opts);
      const json = res.status === 204 ? null : await res.json().catch(() => ({ message: res.statusText }));
      if (!res.ok) throw new Error(json?.message || res.statusText);
      return json;
    }

    function escapeHtml(s) {
      return String(s ?? '').replace(/[&<>"]/g, c => ({ '&': '&amp;', '<': '&lt;', '>': '&gt;', '"': '&quot;' }[c]));
    }

    function table(preview) {
      const head = preview.columns.map(c => `<th>${escapeHtml(c)}</th>`).join('');
      const rows = preview.rows.map(r => `<tr>${r.map(v => `<td>${v === null ? '' : escapeHtml(v)}</td>`).join('')}</tr>`).join('');
      return `<table><thead><tr>${head}</tr></thead><tbody>${rows}</tbody></table>`;
    }

    function summary(s) {
      const types = s.dtypes.map(d => `${escapeHtml(d.name)}: ${d.dtype}`).join(', ');
      return `<p class="meta">${s.rows} rows x ${s.columns} columns, ${(s.memory_bytes / 1024).toFixed(1)} KiB<br/>${types}</p>`;
    }

    function dataset(view, title) {
      if (!view) return '';
      return `<h2>${title}: ${escapeHtml(view.filename)}</h2>${summary(view.summary)}${table(view.preview)}`;
    }

    function setEnabled(ids, enabled) {
      ids.forEach(id => { $(id).disabled = !enabled; });
    }

    function render(view) {
      const authed = view.state !== 'no_credential';
      const hasData = view.state === 'single_dataset' || view.state === 'merged_dataset';
      setEnabled(['primaryFile', 'removePrimary'], authed);
      setEnabled(['secondaryFile', 'removeSecondary', 'mergeKeys', 'saveKeys', 'question', 'askBtn'], hasData);
      document.querySelectorAll('input[name=format]').forEach(r => { r.disabled = !authed; });
      $('phase').textContent = `State: ${view.state.replace('_', ' ')}` + (view.model ? ` | Model: ${view.model}` : '') +
        (view.active_dataset ? ` | Answering from: ${view.active_dataset}` : '');
      if (view.credential_hint) $('keyStatus').innerHTML = `<span class="ok">Key ${escapeHtml(view.credential_hint)}</span>`;
      $('primaryView').innerHTML = dataset(view.primary, 'First dataset');
      $('secondaryView').innerHTML = dataset(view.secondary, 'Second dataset');
      const merge = view.merge;
      if (!merge) $('mergeView').innerHTML = '';
      else if (merge.status === 'merged') $('mergeView').innerHTML = `<h2>Merged on ${merge.keys.map(escapeHtml).join(', ')}</h2>${summary(merge.summary)}${table(merge.preview)}`;
      else $('mergeView').innerHTML = `<p class="warn">${escapeHtml(merge.warning)}</p>`;
      $('history').innerHTML = view.exchanges.slice().reverse().map(a => `
        <div class="card">
          <p><strong>${escapeHtml(a.question)}</strong></p>
          <pre>${escapeHtml(a.text)}</pre>
          ${a.reasoning ? `<details><summary>Reasoning</summary><pre>${escapeHtml(a.reasoning)}</pre></details>` : ''}
          <p class="meta">Query processed in ${a.elapsed_secs.toFixed(2)} seconds.</p>
        </div>`).join('');
    }

    async function guarded(target, fn) {
      try { await fn(); }
      catch (e) { $(target).innerHTML = `<span class="err">${escapeHtml(e.message)}</span>`; }
    }

    async function upload(slot, input) {
      if (!input.files.length) return;
      const form = new FormData();
      form.append('file', input.files[0]);
      await guarded('askStatus', async () => {
        const json = await call('POST', `/datasets/${slot}`, form, true);
        $('askStatus').innerHTML = `<span class="ok">${escapeHtml(json.message)}</span>`;
        render(json.session);
      });
      input.value = '';
    }

    $('saveKey').addEventListener('click', () => guarded('keyStatus', async () => {
      const json = await call('POST', '/credential', { api_key: $('apiKey').value });
      $('apiKey').value = '';
      render(json.session);
      $('keyStatus').innerHTML = `<span class="ok">${escapeHtml(json.message)}</span>`;
    }));

    document.querySelectorAll('input[name=format]').forEach(r => r.addEventListener('change', () =>
      guarded('askStatus', async () => render(await call('PUT', '/format', { format: r.value })))));

    $('saveKeys').addEventListener('click', () => guarded('askStatus', async () => {
      const keys = $('mergeKeys').value.split(',').map(s => s.trim()).filter(Boolean);
      render(await call('PUT', '/merge-keys', { keys: keys.length ? keys : null }));
    }));

    $('primaryFile').addEventListener('change', () => upload('primary', $('primaryFile')));
    $('secondaryFile').addEventListener('change', () => upload('secondary', $('secondaryFile')));
    $('removePrimary').addEventListener('click', () => guarded('askStatus', async () => render(await call('DELETE', '/datasets/primary'))));
    $('removeSecondary').addEventListener('click', () => guarded('askStatus', async () => render(await call('DELETE', '/datasets/secondary'))));

    $('askBtn').addEventListener('click', () => guarded('askStatus', async () => {
      $('askStatus').textContent = 'Processing your query...';
      const json = await call('POST', '/ask', { question: $('question').value });
      $('askStatus').innerHTML = `<span class="ok">${escapeHtml(json.message)}</span>`;
      render(json.session);
    }));

    window.addEventListener('pagehide', () => {
      if (sessionId) fetch(`/api/sessions/${sessionId}`, { method: 'DELETE', keepalive: true });
    });

    (async () => {
      const res = await fetch('/api/sessions', { method: 'POST' });
      const view = await res.json();
      sessionId = view.session_id;
      render(view);
    })();
  </script>
</body>
</html>"#)
}
